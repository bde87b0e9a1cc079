//! Message-bus topics and payload decoding
//!
//! Command topics are `Cmnd/<prefix>/<Name>`, state topics
//! `State/<prefix>/<Name>`. Payloads are plain text.

use super::action::{Action, SleepTimerRequest};
use tagdeck_common::TrackCommand;
use thiserror::Error;

/// Shortest payload accepted as a tag id on the RFID topic
pub const MIN_TAG_ID_LEN: usize = 12;

/// Topics the client subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTopic {
    Sleep,
    Rfid,
    Loudness,
    SleepTimer,
    TrackControl,
    LockControls,
    RepeatMode,
    LedBrightness,
}

impl CommandTopic {
    pub const ALL: [CommandTopic; 8] = [
        CommandTopic::Sleep,
        CommandTopic::Rfid,
        CommandTopic::Loudness,
        CommandTopic::SleepTimer,
        CommandTopic::TrackControl,
        CommandTopic::LockControls,
        CommandTopic::RepeatMode,
        CommandTopic::LedBrightness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommandTopic::Sleep => "Sleep",
            CommandTopic::Rfid => "Rfid",
            CommandTopic::Loudness => "Loudness",
            CommandTopic::SleepTimer => "SleepTimer",
            CommandTopic::TrackControl => "TrackControl",
            CommandTopic::LockControls => "LockControls",
            CommandTopic::RepeatMode => "RepeatMode",
            CommandTopic::LedBrightness => "LedBrightness",
        }
    }
}

/// Topics the client publishes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTopic {
    Sleep,
    Rfid,
    Track,
    Loudness,
    SleepTimer,
    /// Online/offline
    State,
    IPv4,
    LockControls,
    Playmode,
    RepeatMode,
    LedBrightness,
    WifiRssi,
    SoftwareRevision,
    CoverChanged,
}

impl StateTopic {
    pub fn name(self) -> &'static str {
        match self {
            StateTopic::Sleep => "Sleep",
            StateTopic::Rfid => "Rfid",
            StateTopic::Track => "Track",
            StateTopic::Loudness => "Loudness",
            StateTopic::SleepTimer => "SleepTimer",
            StateTopic::State => "State",
            StateTopic::IPv4 => "IPv4",
            StateTopic::LockControls => "LockControls",
            StateTopic::Playmode => "Playmode",
            StateTopic::RepeatMode => "RepeatMode",
            StateTopic::LedBrightness => "LedBrightness",
            StateTopic::WifiRssi => "WifiRssi",
            StateTopic::SoftwareRevision => "SoftwareRevision",
            StateTopic::CoverChanged => "CoverChanged",
        }
    }
}

/// Full topic names for one device prefix
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn command(&self, topic: CommandTopic) -> String {
        format!("Cmnd/{}/{}", self.prefix, topic.name())
    }

    pub fn state(&self, topic: StateTopic) -> String {
        format!("State/{}/{}", self.prefix, topic.name())
    }

    /// Command topic named by `full`, if it is one of ours
    pub fn parse_command(&self, full: &str) -> Option<CommandTopic> {
        CommandTopic::ALL
            .into_iter()
            .find(|t| self.command(*t) == full)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("No valid topic: {0}")]
    UnknownTopic(String),

    #[error("Tag id '{0}' is too short")]
    TagIdTooShort(String),
}

/// Integer types payloads can be parsed into
pub trait ClampedParse: Sized {
    fn parse_clamped(payload: &str) -> Self;
}

/// Leading number of `payload`: an optional '-' (signed targets only) and digits
fn numeric_prefix(payload: &str, signed: bool) -> &str {
    let sign = usize::from(signed && payload.starts_with('-'));
    let digits = payload[sign..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        ""
    } else {
        &payload[..sign + digits]
    }
}

macro_rules! impl_clamped_parse {
    ($($ty:ty => $signed:expr),* $(,)?) => {
        $(
            impl ClampedParse for $ty {
                fn parse_clamped(payload: &str) -> Self {
                    let number = numeric_prefix(payload, $signed);
                    if number.is_empty() {
                        return 0;
                    }
                    // Digits only, so overflow is the one failure left
                    number.parse().unwrap_or(<$ty>::MAX)
                }
            }
        )*
    };
}

impl_clamped_parse!(u8 => false, u16 => false, u32 => false, i32 => true);

/// Parse a numeric payload: out of range gives `T::MAX`, garbage gives 0
pub fn parse_clamped<T: ClampedParse>(payload: &str) -> T {
    T::parse_clamped(payload)
}

/// Translate one bus message into an action
///
/// `Ok(None)` means the payload is deliberately ignored.
pub fn decode(topic: CommandTopic, payload: &str) -> Result<Option<Action>, DecodeError> {
    let action = match topic {
        CommandTopic::Sleep => match payload {
            "OFF" | "0" => Action::Sleep,
            _ => return Ok(None),
        },
        CommandTopic::Rfid => {
            if payload.len() < MIN_TAG_ID_LEN {
                return Err(DecodeError::TagIdTooShort(payload.to_string()));
            }
            Action::PlayTag(payload.to_string())
        }
        CommandTopic::Loudness => Action::SetVolume(parse_clamped(payload)),
        CommandTopic::SleepTimer => Action::SleepTimer(match payload {
            "EOP" => SleepTimerRequest::AfterPlaylist,
            "EOT" => SleepTimerRequest::AfterTrack,
            "EO5T" => SleepTimerRequest::AfterFiveTracks,
            "0" => SleepTimerRequest::Disable,
            other => SleepTimerRequest::Minutes(parse_clamped(other)),
        }),
        CommandTopic::TrackControl => {
            Action::Track(TrackCommand::from_code(parse_clamped(payload)))
        }
        CommandTopic::LockControls => match payload {
            "ON" => Action::LockControls(true),
            "OFF" => Action::LockControls(false),
            _ => return Ok(None),
        },
        CommandTopic::RepeatMode => Action::SetRepeatMode(parse_clamped(payload)),
        CommandTopic::LedBrightness => Action::SetLedBrightness(parse_clamped(payload)),
    };
    Ok(Some(action))
}

/// Decode a message by full topic name
pub fn decode_message(
    topics: &Topics,
    topic: &str,
    payload: &str,
) -> Result<Option<Action>, DecodeError> {
    let command = topics
        .parse_command(topic)
        .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;
    decode(command, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clamped() {
        assert_eq!(parse_clamped::<u8>("42"), 42);
        assert_eq!(parse_clamped::<u8>("99999999999"), u8::MAX);
        assert_eq!(parse_clamped::<u8>("abc"), 0);
        assert_eq!(parse_clamped::<u8>("-1"), 0);
        assert_eq!(parse_clamped::<u8>("12abc"), 12);
        assert_eq!(parse_clamped::<u8>(""), 0);
        assert_eq!(parse_clamped::<i32>("-5"), -5);
        assert_eq!(parse_clamped::<i32>("99999999999"), i32::MAX);
        assert_eq!(parse_clamped::<i32>("-"), 0);
    }

    #[test]
    fn test_topic_names() {
        let topics = Topics::new("kids");
        assert_eq!(topics.command(CommandTopic::TrackControl), "Cmnd/kids/TrackControl");
        assert_eq!(topics.state(StateTopic::Loudness), "State/kids/Loudness");
        assert_eq!(
            topics.parse_command("Cmnd/kids/SleepTimer"),
            Some(CommandTopic::SleepTimer)
        );
        assert_eq!(topics.parse_command("Cmnd/other/SleepTimer"), None);
    }

    #[test]
    fn test_led_brightness_clamps() {
        assert_eq!(
            decode(CommandTopic::LedBrightness, "99999999999"),
            Ok(Some(Action::SetLedBrightness(255)))
        );
    }

    #[test]
    fn test_sleep_timer_sentinels() {
        let decoded = |p| decode(CommandTopic::SleepTimer, p).unwrap().unwrap();
        assert_eq!(decoded("EOP"), Action::SleepTimer(SleepTimerRequest::AfterPlaylist));
        assert_eq!(decoded("EOT"), Action::SleepTimer(SleepTimerRequest::AfterTrack));
        assert_eq!(decoded("EO5T"), Action::SleepTimer(SleepTimerRequest::AfterFiveTracks));
        assert_eq!(decoded("0"), Action::SleepTimer(SleepTimerRequest::Disable));
        assert_eq!(decoded("30"), Action::SleepTimer(SleepTimerRequest::Minutes(30)));
    }

    #[test]
    fn test_ignored_and_rejected_payloads() {
        assert_eq!(decode(CommandTopic::LockControls, "maybe"), Ok(None));
        assert_eq!(decode(CommandTopic::Sleep, "ON"), Ok(None));
        assert_eq!(decode(CommandTopic::Sleep, "OFF"), Ok(Some(Action::Sleep)));
        assert!(matches!(
            decode(CommandTopic::Rfid, "1234"),
            Err(DecodeError::TagIdTooShort(_))
        ));
        assert_eq!(
            decode(CommandTopic::Rfid, "123456789012"),
            Ok(Some(Action::PlayTag("123456789012".into())))
        );
    }

    #[test]
    fn test_track_control_and_unknown_topic() {
        let topics = Topics::new("tagdeck");
        assert_eq!(
            decode_message(&topics, "Cmnd/tagdeck/TrackControl", "4"),
            Ok(Some(Action::Track(TrackCommand::NextTrack)))
        );
        assert_eq!(
            decode_message(&topics, "Cmnd/tagdeck/TrackControl", "77"),
            Ok(Some(Action::Track(TrackCommand::Unknown(77))))
        );
        assert!(matches!(
            decode_message(&topics, "Cmnd/tagdeck/Nope", "1"),
            Err(DecodeError::UnknownTopic(_))
        ));
    }
}
