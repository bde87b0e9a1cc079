//! Track-control state machine
//!
//! Applies one transport command to [`PlaybackState`]. Branches that need the
//! current index re-opened stop the engine and set `pending_open`; the player
//! loop then opens the new index. Everything else relies on the engine
//! reaching the end of the track on its own.

use super::engine::AudioEngine;
use crate::peripherals::Indication;
use crate::tags::ResumePoint;
use tagdeck_common::{PlayMode, RepeatMode, StateCategory, TrackCommand};
use tracing::{info, warn};

/// Elapsed seconds below which PREVIOUS goes back a track instead of
/// restarting the current one
pub const PREVIOUS_TRACK_THRESHOLD_SECS: u32 = 5;

/// Title shown when nothing is queued
pub const NO_PLAYLIST_TITLE: &str = "No playlist active";

/// Playback state owned by the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub playlist: Vec<String>,
    /// What was dispatched: tag source, folder or URL
    pub source: String,
    pub current_track: usize,
    pub paused: bool,
    pub playlist_finished: bool,
    pub track_finished: bool,
    /// Stopped by a command; the player re-opens `current_track`
    pub pending_open: bool,
    pub play_mode: PlayMode,
    pub repeat_track: bool,
    pub repeat_playlist: bool,
    pub sleep_after_playlist: bool,
    pub sleep_after_track: bool,
    pub play_until_track: Option<usize>,
    pub save_position: bool,
    pub tag: Option<String>,
    pub title: String,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playlist: Vec::new(),
            source: String::new(),
            current_track: 0,
            paused: false,
            playlist_finished: true,
            track_finished: false,
            pending_open: false,
            play_mode: PlayMode::NoPlaylist,
            repeat_track: false,
            repeat_playlist: false,
            sleep_after_playlist: false,
            sleep_after_track: false,
            play_until_track: None,
            save_position: false,
            tag: None,
            title: NO_PLAYLIST_TITLE.to_string(),
        }
    }
}

impl PlaybackState {
    pub fn repeat_mode(&self) -> RepeatMode {
        RepeatMode::from_flags(self.repeat_track, self.repeat_playlist)
    }

    pub fn current_path(&self) -> Option<&str> {
        self.playlist.get(self.current_track).map(String::as_str)
    }

    pub fn is_active(&self) -> bool {
        self.play_mode != PlayMode::NoPlaylist && !self.playlist.is_empty()
    }

    /// Resume point for the current index at `position`
    pub fn resume_point(&self, position: u64) -> Option<ResumePoint> {
        let tag = self.tag.clone()?;
        let track = self.current_path()?.to_string();
        Some(ResumePoint {
            tag,
            source: self.source.clone(),
            track,
            position,
            play_mode: self.play_mode,
            track_index: self.current_track,
            playlist_len: self.playlist.len(),
        })
    }
}

/// Result of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// Not applicable in the current state; an error was indicated
    Rejected,
    NoOp,
}

/// Side effects requested by the state machine
pub trait ControlHooks {
    fn save_resume_point(&mut self, point: ResumePoint);
    fn indicate(&mut self, indication: Indication);
    fn broadcast(&mut self, category: StateCategory);
    fn publish_repeat_mode(&mut self, mode: RepeatMode);
    fn cover_cleared(&mut self);
}

/// One recorded side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SaveResumePoint(ResumePoint),
    Indicate(Indication),
    Broadcast(StateCategory),
    PublishRepeatMode(RepeatMode),
    CoverCleared,
}

/// Hooks that record effects for the caller to carry out afterwards
#[derive(Debug, Default)]
pub struct Effects(pub Vec<Effect>);

impl Effects {
    pub fn take(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.0)
    }
}

impl ControlHooks for Effects {
    fn save_resume_point(&mut self, point: ResumePoint) {
        self.0.push(Effect::SaveResumePoint(point));
    }

    fn indicate(&mut self, indication: Indication) {
        self.0.push(Effect::Indicate(indication));
    }

    fn broadcast(&mut self, category: StateCategory) {
        self.0.push(Effect::Broadcast(category));
    }

    fn publish_repeat_mode(&mut self, mode: RepeatMode) {
        self.0.push(Effect::PublishRepeatMode(mode));
    }

    fn cover_cleared(&mut self) {
        self.0.push(Effect::CoverCleared);
    }
}

fn reject(hooks: &mut dyn ControlHooks, reason: &str) -> CommandOutcome {
    warn!("{}", reason);
    hooks.indicate(Indication::Error);
    CommandOutcome::Rejected
}

fn resume_if_paused(state: &mut PlaybackState, engine: &mut dyn AudioEngine) {
    if state.paused {
        engine.pause_resume();
        state.paused = false;
    }
}

fn end_track_loop(state: &mut PlaybackState, hooks: &mut dyn ControlHooks) {
    if state.repeat_track {
        state.repeat_track = false;
        hooks.publish_repeat_mode(state.repeat_mode());
    }
}

fn save_track_start(state: &PlaybackState, hooks: &mut dyn ControlHooks) {
    if state.save_position {
        if let Some(point) = state.resume_point(0) {
            hooks.save_resume_point(point);
            info!("Audiobook track {} will start from the beginning", state.current_track + 1);
        }
    }
}

/// Stop decoding so the player re-opens the current index
fn redispatch(state: &mut PlaybackState, engine: &mut dyn AudioEngine) {
    if !state.playlist_finished {
        engine.stop();
        state.pending_open = true;
    }
}

/// Apply `cmd` to `state`
///
/// With an empty playlist every command except STOP is rejected.
pub fn execute(
    state: &mut PlaybackState,
    cmd: TrackCommand,
    engine: &mut dyn AudioEngine,
    hooks: &mut dyn ControlHooks,
) -> CommandOutcome {
    match cmd {
        TrackCommand::Nop => return CommandOutcome::NoOp,
        TrackCommand::Unknown(code) => {
            return reject(hooks, &format!("Track command {} does not exist", code))
        }
        TrackCommand::Stop => {
            engine.stop();
            info!("Playback stopped");
            state.paused = true;
            state.playlist_finished = true;
            state.pending_open = false;
            state.play_mode = PlayMode::NoPlaylist;
            state.title = NO_PLAYLIST_TITLE.to_string();
            hooks.cover_cleared();
            return CommandOutcome::Applied;
        }
        _ => {}
    }

    if state.playlist.is_empty() {
        return reject(hooks, &format!("{} ignored, no playlist loaded", cmd));
    }
    let len = state.playlist.len();

    match cmd {
        TrackCommand::PausePlay => {
            engine.pause_resume();
            if state.paused {
                info!("Resumed from pause");
            } else {
                info!("Paused");
            }
            if state.save_position && !state.paused {
                let offset = engine.file_position().saturating_sub(engine.buffered());
                info!(
                    "Track paused at file position {} (played up to {})",
                    engine.file_position(),
                    offset
                );
                if let Some(point) = state.resume_point(offset) {
                    hooks.save_resume_point(point);
                }
            }
            state.paused = !state.paused;
            hooks.broadcast(StateCategory::TrackInfo);
            CommandOutcome::Applied
        }

        TrackCommand::NextTrack => {
            resume_if_paused(state, engine);
            end_track_loop(state, hooks);

            if state.current_track + 1 >= len && !state.repeat_playlist {
                return reject(hooks, "Last track already active");
            }
            if state.current_track + 1 >= len {
                state.current_track = 0;
            } else {
                state.current_track += 1;
            }
            save_track_start(state, hooks);
            info!("Next track");
            redispatch(state, engine);
            CommandOutcome::Applied
        }

        TrackCommand::PreviousTrack => {
            resume_if_paused(state, engine);
            end_track_loop(state, hooks);

            match state.play_mode {
                PlayMode::Webstream => reject(hooks, "Track change is not possible for webstreams"),
                PlayMode::LocalM3u => {
                    info!("Previous track");
                    if state.current_track > 0 {
                        state.current_track -= 1;
                        CommandOutcome::Applied
                    } else {
                        reject(hooks, "First track already active")
                    }
                }
                _ if state.current_track > 0 || state.repeat_playlist => {
                    if engine.elapsed_secs() < PREVIOUS_TRACK_THRESHOLD_SECS {
                        if state.current_track == 0 {
                            state.current_track = len - 1;
                        } else {
                            state.current_track -= 1;
                        }
                    }
                    save_track_start(state, hooks);
                    info!("Previous track");
                    redispatch(state, engine);
                    CommandOutcome::Applied
                }
                _ => {
                    // First track without repeat: play it again from the start
                    if state.save_position {
                        if let Some(point) = state.resume_point(0) {
                            hooks.save_resume_point(point);
                        }
                    }
                    engine.stop();
                    hooks.indicate(Indication::Rewind);
                    let track = state.playlist[state.current_track].clone();
                    if !engine.open(&track, 0) {
                        hooks.indicate(Indication::Error);
                        state.track_finished = true;
                        warn!("Could not re-open {}", track);
                        return CommandOutcome::Rejected;
                    }
                    info!("Restarting {}", track);
                    CommandOutcome::Applied
                }
            }
        }

        TrackCommand::FirstTrack => {
            resume_if_paused(state, engine);
            state.current_track = 0;
            save_track_start(state, hooks);
            info!("First track");
            redispatch(state, engine);
            CommandOutcome::Applied
        }

        TrackCommand::LastTrack => {
            resume_if_paused(state, engine);
            if state.current_track + 1 >= len {
                return reject(hooks, "Last track already active");
            }
            state.current_track = len - 1;
            save_track_start(state, hooks);
            info!("Last track");
            redispatch(state, engine);
            CommandOutcome::Applied
        }

        TrackCommand::Stop | TrackCommand::Nop | TrackCommand::Unknown(_) => CommandOutcome::NoOp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Engine double recording calls
    #[derive(Default)]
    struct FakeEngine {
        running: bool,
        paused: bool,
        elapsed: u32,
        position: u64,
        buffered: u64,
        open_ok: bool,
        opened: Vec<String>,
        stops: usize,
    }

    impl AudioEngine for FakeEngine {
        fn open(&mut self, source: &str, _offset: u64) -> bool {
            self.opened.push(source.to_string());
            self.running = self.open_ok;
            self.open_ok
        }
        fn stop(&mut self) {
            self.stops += 1;
            self.running = false;
        }
        fn pause_resume(&mut self) {
            self.paused = !self.paused;
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn file_position(&self) -> u64 {
            self.position
        }
        fn buffered(&self) -> u64 {
            self.buffered
        }
        fn elapsed_secs(&self) -> u32 {
            self.elapsed
        }
        fn duration_secs(&self) -> u32 {
            0
        }
        fn seek_secs(&mut self, _secs: u32) -> bool {
            false
        }
        fn set_volume(&mut self, _volume: u8) {}
        fn set_tone(&mut self, _low: i8, _band: i8, _high: i8) {}
        fn advance(&mut self, _elapsed: Duration) {}
    }

    fn playing(tracks: usize, mode: PlayMode) -> PlaybackState {
        PlaybackState {
            playlist: (0..tracks).map(|i| format!("/music/{:02}.mp3", i)).collect(),
            source: "/music".into(),
            playlist_finished: false,
            play_mode: mode,
            tag: Some("1234".into()),
            ..PlaybackState::default()
        }
    }

    fn run(state: &mut PlaybackState, cmd: TrackCommand, engine: &mut FakeEngine) -> (CommandOutcome, Vec<Effect>) {
        let mut effects = Effects::default();
        let outcome = execute(state, cmd, engine, &mut effects);
        (outcome, effects.take())
    }

    #[test]
    fn test_next_at_end_without_repeat_is_rejected() {
        let mut state = playing(3, PlayMode::AllTracksSorted);
        state.current_track = 2;
        let mut engine = FakeEngine::default();

        let (outcome, effects) = run(&mut state, TrackCommand::NextTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert_eq!(state.current_track, 2);
        assert_eq!(effects, vec![Effect::Indicate(Indication::Error)]);
        assert_eq!(engine.stops, 0);
    }

    #[test]
    fn test_next_at_end_with_repeat_wraps() {
        let mut state = playing(3, PlayMode::AllTracksSortedLoop);
        state.current_track = 2;
        state.repeat_playlist = true;
        let mut engine = FakeEngine::default();

        let (outcome, _) = run(&mut state, TrackCommand::NextTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(state.current_track, 0);
        assert_eq!(engine.stops, 1);
        assert!(state.pending_open);
    }

    #[test]
    fn test_next_resumes_and_ends_track_loop() {
        let mut state = playing(3, PlayMode::AllTracksSorted);
        state.paused = true;
        state.repeat_track = true;
        let mut engine = FakeEngine {
            paused: true,
            ..FakeEngine::default()
        };

        let (_, effects) = run(&mut state, TrackCommand::NextTrack, &mut engine);
        assert!(!state.paused);
        assert!(!engine.paused);
        assert!(!state.repeat_track);
        assert_eq!(effects, vec![Effect::PublishRepeatMode(RepeatMode::None)]);
        assert_eq!(state.current_track, 1);
    }

    #[test]
    fn test_previous_in_webstream_rejected() {
        let mut state = playing(1, PlayMode::Webstream);
        let mut engine = FakeEngine::default();
        let (outcome, _) = run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert_eq!(state.current_track, 0);
    }

    #[test]
    fn test_previous_threshold() {
        let mut state = playing(3, PlayMode::AllTracksSorted);
        state.current_track = 2;

        let mut engine = FakeEngine {
            elapsed: 3,
            ..FakeEngine::default()
        };
        run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(state.current_track, 1);

        engine.elapsed = 30;
        run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(state.current_track, 1, "late in the track restarts it");
        assert_eq!(engine.stops, 2);
    }

    #[test]
    fn test_previous_wraps_to_last_with_repeat() {
        let mut state = playing(4, PlayMode::AllTracksSortedLoop);
        state.repeat_playlist = true;
        let mut engine = FakeEngine::default();
        run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(state.current_track, 3);
    }

    #[test]
    fn test_previous_at_start_reopens_track() {
        let mut state = playing(2, PlayMode::AllTracksSorted);
        let mut engine = FakeEngine {
            open_ok: true,
            ..FakeEngine::default()
        };
        let (outcome, effects) = run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(engine.opened, vec!["/music/00.mp3".to_string()]);
        assert_eq!(effects, vec![Effect::Indicate(Indication::Rewind)]);
        assert!(!state.pending_open);

        engine.open_ok = false;
        let (outcome, _) = run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert!(state.track_finished);
    }

    #[test]
    fn test_previous_in_m3u_only_decrements() {
        let mut state = playing(3, PlayMode::LocalM3u);
        state.current_track = 1;
        let mut engine = FakeEngine::default();
        run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(state.current_track, 0);
        assert_eq!(engine.stops, 0);

        let (outcome, _) = run(&mut state, TrackCommand::PreviousTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
    }

    #[test]
    fn test_pause_persists_only_when_pausing() {
        let mut state = playing(3, PlayMode::Audiobook);
        state.save_position = true;
        state.current_track = 1;
        let mut engine = FakeEngine {
            position: 50_000,
            buffered: 8_000,
            ..FakeEngine::default()
        };

        let (_, effects) = run(&mut state, TrackCommand::PausePlay, &mut engine);
        assert!(state.paused);
        assert_eq!(effects.len(), 2);
        match &effects[0] {
            Effect::SaveResumePoint(point) => {
                assert_eq!(point.position, 42_000);
                assert_eq!(point.track, "/music/01.mp3");
                assert_eq!(point.track_index, 1);
            }
            other => panic!("unexpected effect {:?}", other),
        }
        assert_eq!(effects[1], Effect::Broadcast(StateCategory::TrackInfo));

        let (_, effects) = run(&mut state, TrackCommand::PausePlay, &mut engine);
        assert!(!state.paused);
        assert_eq!(effects, vec![Effect::Broadcast(StateCategory::TrackInfo)]);
    }

    #[test]
    fn test_first_and_last() {
        let mut state = playing(5, PlayMode::AllTracksSorted);
        state.current_track = 2;
        let mut engine = FakeEngine::default();

        run(&mut state, TrackCommand::LastTrack, &mut engine);
        assert_eq!(state.current_track, 4);
        let (outcome, _) = run(&mut state, TrackCommand::LastTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);

        run(&mut state, TrackCommand::FirstTrack, &mut engine);
        assert_eq!(state.current_track, 0);
    }

    #[test]
    fn test_stop_resets_flags() {
        let mut state = playing(2, PlayMode::AllTracksSorted);
        let mut engine = FakeEngine::default();
        let (outcome, effects) = run(&mut state, TrackCommand::Stop, &mut engine);

        assert_eq!(outcome, CommandOutcome::Applied);
        assert!(state.paused);
        assert!(state.playlist_finished);
        assert_eq!(state.play_mode, PlayMode::NoPlaylist);
        assert_eq!(state.title, NO_PLAYLIST_TITLE);
        assert_eq!(effects, vec![Effect::CoverCleared]);

        // Finished playlist: index moves but nothing is re-opened
        let (outcome, _) = run(&mut state, TrackCommand::NextTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Applied);
        assert!(!state.pending_open);
    }

    #[test]
    fn test_unknown_and_nop() {
        let mut state = PlaybackState::default();
        let mut engine = FakeEngine::default();
        let (outcome, effects) = run(&mut state, TrackCommand::Unknown(42), &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert_eq!(effects, vec![Effect::Indicate(Indication::Error)]);
        assert_eq!(run(&mut state, TrackCommand::Nop, &mut engine).0, CommandOutcome::NoOp);
    }

    #[test]
    fn test_empty_playlist_rejected() {
        let mut state = PlaybackState::default();
        let mut engine = FakeEngine::default();
        let (outcome, _) = run(&mut state, TrackCommand::NextTrack, &mut engine);
        assert_eq!(outcome, CommandOutcome::Rejected);
        let (outcome, _) = run(&mut state, TrackCommand::Stop, &mut engine);
        assert_eq!(outcome, CommandOutcome::Applied);
    }
}
