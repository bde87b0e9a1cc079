//! Player actor
//!
//! Owns [`PlaybackState`] and the audio engine and drains a single action
//! queue, so every mutation of playback state happens on one task. After each
//! action or tick a [`PlayerSnapshot`] is published for readers.

use super::engine::{is_stream_url, AudioEngine};
use super::playlist::PlaylistBuilder;
use super::track_control::{self, CommandOutcome, Effect, Effects, PlaybackState, NO_PLAYLIST_TITLE};
use crate::bridge::action::{Action, ModuleCommand, PlayerSettings, SleepTimerRequest, SEEK_STEP_SECS};
use crate::bridge::bus::StateTopic;
use crate::error::{Error, Result};
use crate::peripherals::{Indication, Peripherals};
use crate::state::{SharedState, ALL_CLIENTS};
use crate::tags::{TagRecord, TagStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tagdeck_common::{PlayMode, RepeatMode, StateCategory, TrackCommand};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Queue depth of the action channel
pub const ACTION_QUEUE_DEPTH: usize = 32;

/// Read-only view of the player for renderers and handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub paused: bool,
    /// Zero-based index of the current track
    pub current_track: usize,
    pub track_count: usize,
    pub volume: u8,
    pub title: String,
    pub play_mode: PlayMode,
    pub repeat_mode: u8,
    pub pos_percent: u8,
    pub elapsed_secs: u32,
    pub duration_secs: u32,
    pub current_tag: Option<String>,
    pub controls_locked: bool,
    /// Minutes of an active sleep timer, 0 when none
    pub sleep_timer_minutes: u8,
    pub playlist_active: bool,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            paused: false,
            current_track: 0,
            track_count: 0,
            volume: 0,
            title: NO_PLAYLIST_TITLE.to_string(),
            play_mode: PlayMode::NoPlaylist,
            repeat_mode: RepeatMode::None.code(),
            pos_percent: 0,
            elapsed_secs: 0,
            duration_secs: 0,
            current_tag: None,
            controls_locked: false,
            sleep_timer_minutes: 0,
            playlist_active: false,
        }
    }
}

struct Request {
    action: Action,
    reply: Option<oneshot::Sender<CommandOutcome>>,
}

/// Cloneable handle used by every ingress
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<Request>,
    snapshot: watch::Receiver<PlayerSnapshot>,
}

impl PlayerHandle {
    /// Queue `action` without waiting; a full queue drops it
    pub fn send(&self, action: Action) -> Result<()> {
        self.tx
            .try_send(Request { action, reply: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(req) => {
                    warn!("Player queue full, dropping {:?}", req.action);
                    Error::Playback("player queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => Error::Playback("player stopped".into()),
            })
    }

    /// Queue `action` and wait until the player has applied it
    pub async fn execute(&self, action: Action) -> Result<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                action,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::Playback("player stopped".into()))?;
        rx.await
            .map_err(|_| Error::Playback("player dropped the request".into()))
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }
}

#[derive(Debug, Clone, Copy)]
struct SleepTimer {
    minutes: u8,
    started: Instant,
}

impl SleepTimer {
    fn expired(&self) -> bool {
        self.started.elapsed() >= Duration::from_secs(self.minutes as u64 * 60)
    }
}

/// Display title for a track reference
fn title_of(track: &str) -> String {
    if is_stream_url(track) {
        return track.to_string();
    }
    track.rsplit('/').next().unwrap_or(track).to_string()
}

pub struct Player {
    state: PlaybackState,
    engine: Box<dyn AudioEngine>,
    playlists: PlaylistBuilder,
    tags: TagStore,
    peripherals: Peripherals,
    shared: Arc<SharedState>,
    settings: PlayerSettings,
    volume: u8,
    locked: bool,
    night_mode: bool,
    current_tag: Option<String>,
    sleep_timer: Option<SleepTimer>,
    tick: Duration,
    rx: mpsc::Receiver<Request>,
    snapshot_tx: watch::Sender<PlayerSnapshot>,
}

impl Player {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Box<dyn AudioEngine>,
        playlists: PlaylistBuilder,
        tags: TagStore,
        peripherals: Peripherals,
        shared: Arc<SharedState>,
        settings: PlayerSettings,
        tick: Duration,
    ) -> (Self, PlayerHandle) {
        let (tx, rx) = mpsc::channel(ACTION_QUEUE_DEPTH);
        let (snapshot_tx, snapshot) = watch::channel(PlayerSnapshot::default());

        let mut player = Self {
            state: PlaybackState::default(),
            engine,
            playlists,
            tags,
            peripherals,
            shared,
            settings,
            volume: settings.init_volume,
            locked: false,
            night_mode: false,
            current_tag: None,
            sleep_timer: None,
            tick,
            rx,
            snapshot_tx,
        };
        player.apply_settings(settings);
        player.publish_snapshot();

        (player, PlayerHandle { tx, snapshot })
    }

    /// Spawn the actor loop
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Player started (volume {}, max {})", self.volume, self.settings.max_volume);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(Request { action, reply }) => {
                        let outcome = self.handle(action).await;
                        self.publish_snapshot();
                        if let Some(reply) = reply {
                            let _ = reply.send(outcome);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.engine.advance(now - last_tick);
                    last_tick = now;
                    self.poll().await;
                }
            }
            self.publish_snapshot();
        }
        info!("Player stopped");
    }

    fn indicate(&self, indication: Indication) {
        self.peripherals.indicator.indicate(indication);
    }

    fn reject(&self, reason: &str) -> CommandOutcome {
        warn!("{}", reason);
        self.indicate(Indication::Error);
        CommandOutcome::Rejected
    }

    fn snapshot(&self) -> PlayerSnapshot {
        let duration = self.engine.duration_secs();
        let elapsed = self.engine.elapsed_secs();
        let pos_percent = if duration > 0 {
            ((elapsed as u64 * 100) / duration as u64).min(100) as u8
        } else {
            0
        };
        PlayerSnapshot {
            paused: self.state.paused,
            current_track: self.state.current_track,
            track_count: self.state.playlist.len(),
            volume: self.volume,
            title: self.state.title.clone(),
            play_mode: self.state.play_mode,
            repeat_mode: self.state.repeat_mode().code(),
            pos_percent,
            elapsed_secs: elapsed,
            duration_secs: duration,
            current_tag: self.current_tag.clone(),
            controls_locked: self.locked,
            sleep_timer_minutes: self.sleep_timer.map(|t| t.minutes).unwrap_or(0),
            playlist_active: self.state.is_active(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    async fn handle(&mut self, action: Action) -> CommandOutcome {
        debug!("Action {:?}", action);
        match action {
            Action::Track(cmd) => self.track_command(cmd).await,
            Action::PlayTag(id) => self.play_tag(id).await,
            Action::PlayPath { path, mode } => self.dispatch(path, mode, None, 0, 0).await,
            Action::Module(id) => self.module(id).await,
            Action::SetVolume(volume) => {
                self.set_volume(volume);
                CommandOutcome::Applied
            }
            Action::SeekPercent(percent) => self.seek_percent(percent),
            Action::SetRepeatMode(code) => self.set_repeat_mode(code),
            Action::SleepTimer(request) => self.sleep_timer_request(request),
            Action::LockControls(lock) => self.lock_controls(lock),
            Action::SetLedBrightness(brightness) => {
                self.peripherals.indicator.set_brightness(brightness);
                self.shared.publish(StateTopic::LedBrightness, brightness.to_string());
                CommandOutcome::Applied
            }
            Action::Equalizer { low, band, high } => {
                self.settings.gains = (low, band, high);
                self.engine.set_tone(low, band, high);
                CommandOutcome::Applied
            }
            Action::Configure(settings) => {
                self.apply_settings(settings);
                CommandOutcome::Applied
            }
            Action::Sleep => {
                self.enter_sleep().await;
                CommandOutcome::Applied
            }
        }
    }

    fn apply_settings(&mut self, settings: PlayerSettings) {
        self.settings = settings;
        self.playlists.set_sort_mode(settings.sort_mode);
        let (low, band, high) = settings.gains;
        self.engine.set_tone(low, band, high);
        if self.volume > settings.max_volume {
            self.set_volume(settings.max_volume as i32);
        } else {
            self.engine.set_volume(self.volume);
        }
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SaveResumePoint(point) => {
                    if let Err(e) = self.tags.save_resume_point(&point).await {
                        error!("Saving resume point for tag {} failed: {}", point.tag, e);
                    }
                }
                Effect::Indicate(indication) => self.indicate(indication),
                Effect::Broadcast(category) => self.shared.notify_clients(ALL_CLIENTS, category),
                Effect::PublishRepeatMode(mode) => {
                    self.shared.publish(StateTopic::RepeatMode, mode.code().to_string())
                }
                Effect::CoverCleared => {
                    self.shared.notify_clients(ALL_CLIENTS, StateCategory::CoverImage);
                    self.shared.publish(StateTopic::CoverChanged, "");
                }
            }
        }
    }

    async fn track_command(&mut self, cmd: TrackCommand) -> CommandOutcome {
        let mut effects = Effects::default();
        let outcome = track_control::execute(&mut self.state, cmd, self.engine.as_mut(), &mut effects);
        self.apply_effects(effects.take()).await;
        if cmd == TrackCommand::Stop {
            self.announce_track();
        }
        outcome
    }

    /// Tell clients and the bus what is playing
    fn announce_track(&self) {
        self.shared.notify_clients(ALL_CLIENTS, StateCategory::TrackInfo);
        self.shared.publish(StateTopic::Track, self.state.title.clone());
        self.shared
            .publish(StateTopic::Playmode, self.state.play_mode.code().to_string());
    }

    async fn play_tag(&mut self, id: String) -> CommandOutcome {
        info!("Tag {} received", id);
        self.current_tag = Some(id.clone());
        self.shared.notify_clients(ALL_CLIENTS, StateCategory::CurrentTag);
        self.shared.publish(StateTopic::Rfid, id.clone());

        let record = match self.tags.lookup(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => return self.reject(&format!("Tag {} is not assigned", id)),
            Err(e) => return self.reject(&format!("Lookup of tag {} failed: {}", id, e)),
        };

        let unlocks = matches!(
            record,
            TagRecord::Module { mod_id } if ModuleCommand::from_id(mod_id) == Some(ModuleCommand::ToggleLockControls)
        );
        if self.locked && !unlocks {
            return self.reject("Controls are locked, tag ignored");
        }

        match record {
            TagRecord::Module { mod_id } => self.module(mod_id).await,
            TagRecord::Music {
                file_or_url,
                play_mode,
                last_play_pos,
                track_last_played,
            } => {
                self.dispatch(file_or_url, play_mode, Some(id), last_play_pos, track_last_played)
                    .await
            }
        }
    }

    /// Replace the playlist and start playing
    async fn dispatch(
        &mut self,
        source: String,
        mode: PlayMode,
        tag: Option<String>,
        offset: u64,
        track: usize,
    ) -> CommandOutcome {
        let tracks = match self.playlists.build(&source, mode) {
            Ok(tracks) => tracks,
            Err(e) => return self.reject(&format!("Cannot play {}: {}", source, e)),
        };

        self.engine.stop();
        let persists = mode.persists_position();
        let start = if persists && track < tracks.len() { track } else { 0 };
        info!(
            "Playing {} (mode {}, {} tracks, starting at {})",
            source,
            mode,
            tracks.len(),
            start + 1
        );

        self.state = PlaybackState {
            playlist: tracks,
            source,
            current_track: start,
            playlist_finished: false,
            play_mode: mode,
            repeat_track: mode.repeats_track(),
            repeat_playlist: mode.repeats_playlist(),
            save_position: persists,
            tag,
            ..PlaybackState::default()
        };
        self.shared
            .publish(StateTopic::RepeatMode, self.state.repeat_mode().code().to_string());

        let offset = if persists { offset } else { 0 };
        if self.open_current(offset).await {
            self.indicate(Indication::Ok);
            CommandOutcome::Applied
        } else {
            CommandOutcome::Rejected
        }
    }

    /// Open the current index; a failure marks the track finished
    async fn open_current(&mut self, offset: u64) -> bool {
        let Some(track) = self.state.current_path().map(str::to_string) else {
            return false;
        };
        self.state.track_finished = false;
        self.state.pending_open = false;

        if !self.engine.open(&track, offset) {
            error!("Could not open {}", track);
            self.indicate(Indication::Error);
            self.state.track_finished = true;
            return false;
        }
        self.engine.set_volume(self.volume);
        self.state.title = title_of(&track);
        info!(
            "Track {}/{}: {}",
            self.state.current_track + 1,
            self.state.playlist.len(),
            self.state.title
        );
        self.announce_track();
        true
    }

    /// Periodic housekeeping: sleep timer, re-dispatch and end of track
    async fn poll(&mut self) {
        if let Some(timer) = self.sleep_timer {
            if timer.expired() {
                info!("Sleep timer of {} minutes expired", timer.minutes);
                self.enter_sleep().await;
                return;
            }
        }

        if self.state.playlist_finished || self.state.paused || self.state.playlist.is_empty() {
            return;
        }
        if self.state.track_finished {
            self.on_track_end().await;
            return;
        }
        if self.engine.is_running() {
            self.shared
                .notify_clients(ALL_CLIENTS, StateCategory::TrackProgress);
            return;
        }
        if self.state.pending_open {
            self.open_current(0).await;
        } else {
            self.on_track_end().await;
        }
    }

    fn save_track_start(&mut self) -> Option<crate::tags::ResumePoint> {
        if self.state.save_position {
            self.state.resume_point(0)
        } else {
            None
        }
    }

    async fn on_track_end(&mut self) {
        self.state.track_finished = false;
        let current = self.state.current_track;
        let len = self.state.playlist.len();
        debug!("Track {} of {} finished", current + 1, len);

        if self.state.sleep_after_track {
            info!("Going to sleep after the current track");
            self.enter_sleep().await;
            return;
        }
        if self.state.repeat_track {
            self.open_current(0).await;
            return;
        }
        if self.state.play_until_track == Some(current) {
            info!("Reached the last of the five remaining tracks");
            self.enter_sleep().await;
            return;
        }

        if current + 1 < len || (self.state.repeat_playlist && len > 0) {
            self.state.current_track = if current + 1 < len { current + 1 } else { 0 };
            if let Some(point) = self.save_track_start() {
                self.apply_effects(vec![Effect::SaveResumePoint(point)]).await;
            }
            self.open_current(0).await;
            return;
        }

        self.finish_playlist().await;
    }

    async fn finish_playlist(&mut self) {
        info!("Playlist finished");
        self.state.current_track = 0;
        if let Some(point) = self.save_track_start() {
            // Next scan starts the audiobook from the beginning
            self.apply_effects(vec![Effect::SaveResumePoint(point)]).await;
        }
        self.engine.stop();
        self.state.playlist_finished = true;
        self.state.play_mode = PlayMode::NoPlaylist;
        self.state.title = NO_PLAYLIST_TITLE.to_string();
        self.announce_track();

        if self.state.sleep_after_playlist {
            info!("Going to sleep after the playlist");
            self.enter_sleep().await;
        }
    }

    async fn enter_sleep(&mut self) {
        if self.state.save_position && !self.state.paused && self.engine.is_running() {
            let offset = self.engine.file_position().saturating_sub(self.engine.buffered());
            if let Some(point) = self.state.resume_point(offset) {
                self.apply_effects(vec![Effect::SaveResumePoint(point)]).await;
            }
        }
        self.track_command(TrackCommand::Stop).await;
        self.clear_sleep();
        self.set_night_mode(false);
        info!("Requesting sleep");
        self.peripherals.power.request_sleep();
    }

    fn set_volume(&mut self, requested: i32) {
        let max = self.settings.max_volume;
        let volume = requested.clamp(0, max as i32) as u8;
        if volume as i32 != requested {
            debug!("Volume {} clamped to {}", requested, volume);
        }
        self.volume = volume;
        self.engine.set_volume(volume);
        self.shared.notify_clients(ALL_CLIENTS, StateCategory::Volume);
        self.shared.publish(StateTopic::Loudness, volume.to_string());
    }

    fn seek_to(&mut self, secs: u32) -> CommandOutcome {
        if !self.state.is_active() || self.engine.duration_secs() == 0 {
            return self.reject("Seeking is not possible for the current source");
        }
        if !self.engine.seek_secs(secs) {
            return self.reject("Seek failed");
        }
        self.shared
            .notify_clients(ALL_CLIENTS, StateCategory::TrackProgress);
        CommandOutcome::Applied
    }

    fn seek_percent(&mut self, percent: u8) -> CommandOutcome {
        let secs = self.engine.duration_secs() as u64 * percent.min(100) as u64 / 100;
        self.seek_to(secs as u32)
    }

    fn seek_relative(&mut self, forwards: bool) -> CommandOutcome {
        let elapsed = self.engine.elapsed_secs();
        let target = if forwards {
            elapsed.saturating_add(SEEK_STEP_SECS)
        } else {
            elapsed.saturating_sub(SEEK_STEP_SECS)
        };
        self.seek_to(target.min(self.engine.duration_secs()))
    }

    fn publish_repeat_mode(&self) {
        self.shared
            .publish(StateTopic::RepeatMode, self.state.repeat_mode().code().to_string());
    }

    fn set_repeat_mode(&mut self, code: u8) -> CommandOutcome {
        info!("Repeat mode {} requested", code);
        if self.state.play_mode == PlayMode::NoPlaylist {
            self.publish_repeat_mode();
            return self.reject("Repeat mode cannot be changed without an active playlist");
        }
        match RepeatMode::from_code(code) {
            Some(mode) => {
                let (track, playlist) = mode.flags();
                self.state.repeat_track = track;
                self.state.repeat_playlist = playlist;
                self.publish_repeat_mode();
                info!("Repeat mode now {:?}", mode);
                self.indicate(Indication::Ok);
                CommandOutcome::Applied
            }
            None => {
                self.publish_repeat_mode();
                self.reject(&format!("Repeat mode {} does not exist", code))
            }
        }
    }

    fn set_night_mode(&mut self, enabled: bool) {
        self.night_mode = enabled;
        self.peripherals.indicator.set_night_mode(enabled);
    }

    fn sleep_enabled(&self) -> bool {
        self.sleep_timer.is_some()
            || self.state.sleep_after_playlist
            || self.state.sleep_after_track
            || self.state.play_until_track.is_some()
    }

    fn clear_sleep(&mut self) {
        self.sleep_timer = None;
        self.state.sleep_after_playlist = false;
        self.state.sleep_after_track = false;
        self.state.play_until_track = None;
    }

    fn set_sleep_minutes(&mut self, minutes: u8) {
        self.sleep_timer = (minutes > 0).then(|| SleepTimer {
            minutes,
            started: Instant::now(),
        });
        info!("Sleep timer set to {} minutes", minutes);
        self.shared.publish(StateTopic::SleepTimer, minutes.to_string());
    }

    fn sleep_timer_request(&mut self, request: SleepTimerRequest) -> CommandOutcome {
        if self.state.play_mode == PlayMode::NoPlaylist {
            self.shared.publish(StateTopic::Sleep, "0");
            return self.reject("Sleep timer cannot be modified while idle");
        }

        match request {
            SleepTimerRequest::AfterPlaylist => {
                self.state.sleep_after_playlist = true;
                info!("Sleep after end of playlist");
                self.shared.publish(StateTopic::SleepTimer, "EOP");
            }
            SleepTimerRequest::AfterTrack => {
                self.state.sleep_after_track = true;
                info!("Sleep after end of track");
                self.shared.publish(StateTopic::SleepTimer, "EOT");
            }
            SleepTimerRequest::AfterFiveTracks => {
                let len = self.state.playlist.len();
                if len == 0 {
                    return self.reject("Sleep timer cannot be modified without a playlist");
                }
                let until = self.state.current_track + 5;
                if len - 1 >= until {
                    self.state.play_until_track = Some(until);
                } else {
                    self.state.sleep_after_playlist = true;
                }
                info!("Sleep after five more tracks");
                self.shared.publish(StateTopic::SleepTimer, "EO5T");
            }
            SleepTimerRequest::Disable => {
                if !self.sleep_enabled() {
                    return self.reject("Sleep timer is not active");
                }
                self.clear_sleep();
                info!("Sleep timer stopped");
                self.indicate(Indication::Ok);
                self.set_night_mode(false);
                self.shared.publish(StateTopic::Sleep, "0");
                return CommandOutcome::Applied;
            }
            SleepTimerRequest::Minutes(minutes) => {
                self.set_sleep_minutes(minutes);
                self.indicate(Indication::Ok);
                self.state.sleep_after_playlist = false;
                self.state.sleep_after_track = false;
                return CommandOutcome::Applied;
            }
        }

        self.set_night_mode(true);
        self.indicate(Indication::Ok);
        CommandOutcome::Applied
    }

    fn lock_controls(&mut self, lock: bool) -> CommandOutcome {
        self.locked = lock;
        info!("Controls {}", if lock { "locked" } else { "unlocked" });
        self.shared
            .publish(StateTopic::LockControls, if lock { "ON" } else { "OFF" });
        self.indicate(Indication::Ok);
        CommandOutcome::Applied
    }

    fn toggle_repeat(&mut self, track: bool) -> CommandOutcome {
        if !self.state.is_active() {
            return self.reject("Repeat mode cannot be changed without an active playlist");
        }
        if track {
            self.state.repeat_track = !self.state.repeat_track;
        } else {
            self.state.repeat_playlist = !self.state.repeat_playlist;
        }
        self.publish_repeat_mode();
        self.indicate(Indication::Ok);
        CommandOutcome::Applied
    }

    async fn module(&mut self, id: u8) -> CommandOutcome {
        let Some(cmd) = ModuleCommand::from_id(id) else {
            return self.reject(&format!("Module command {} does not exist", id));
        };
        info!("Module command {} ({:?})", id, cmd);

        match cmd {
            ModuleCommand::ToggleLockControls => self.lock_controls(!self.locked),
            ModuleCommand::SleepTimer(minutes) => {
                let same = self.sleep_timer.map(|t| t.minutes) == Some(minutes);
                if same {
                    self.clear_sleep();
                    self.shared.publish(StateTopic::SleepTimer, "0");
                    self.set_night_mode(false);
                } else {
                    self.set_sleep_minutes(minutes);
                    self.set_night_mode(true);
                }
                self.indicate(Indication::Ok);
                CommandOutcome::Applied
            }
            ModuleCommand::SleepAfterTrack => {
                self.sleep_timer_request(SleepTimerRequest::AfterTrack)
            }
            ModuleCommand::SleepAfterPlaylist => {
                self.sleep_timer_request(SleepTimerRequest::AfterPlaylist)
            }
            ModuleCommand::SleepAfterFiveTracks => {
                self.sleep_timer_request(SleepTimerRequest::AfterFiveTracks)
            }
            ModuleCommand::ToggleRepeatPlaylist => self.toggle_repeat(false),
            ModuleCommand::ToggleRepeatTrack => self.toggle_repeat(true),
            ModuleCommand::ToggleNightMode => {
                let enabled = !self.night_mode;
                self.set_night_mode(enabled);
                if enabled {
                    self.peripherals
                        .indicator
                        .set_brightness(self.settings.night_brightness);
                }
                self.indicate(Indication::Ok);
                CommandOutcome::Applied
            }
            ModuleCommand::Track(cmd) => self.track_command(cmd).await,
            ModuleCommand::VolumeInit => {
                self.set_volume(self.settings.init_volume as i32);
                CommandOutcome::Applied
            }
            ModuleCommand::VolumeUp => {
                self.set_volume(self.volume as i32 + 1);
                CommandOutcome::Applied
            }
            ModuleCommand::VolumeDown => {
                self.set_volume(self.volume as i32 - 1);
                CommandOutcome::Applied
            }
            ModuleCommand::Sleep => {
                self.enter_sleep().await;
                CommandOutcome::Applied
            }
            ModuleCommand::SeekForwards => self.seek_relative(true),
            ModuleCommand::SeekBackwards => self.seek_relative(false),
            ModuleCommand::Unavailable(id) => {
                self.reject(&format!("Module command {} is not available on this device", id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::HostPeripherals;
    use crate::playback::engine::{SimulatedEngine, SIMULATED_BYTE_RATE};
    use crate::state::bus_payloads;
    use tagdeck_common::db::init_memory_database;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        player: Player,
        handle: PlayerHandle,
        host: Arc<HostPeripherals>,
        tags: TagStore,
        shared: Arc<SharedState>,
    }

    /// Library with a three-track book of two seconds per track
    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("book");
        std::fs::create_dir_all(&book).unwrap();
        for name in ["01.mp3", "02.mp3", "03.mp3"] {
            std::fs::write(book.join(name), vec![0u8; 2 * SIMULATED_BYTE_RATE as usize]).unwrap();
        }

        let pool = init_memory_database().await.unwrap();
        let tags = TagStore::new(pool, dir.path().join("backup.txt"));
        let host = Arc::new(HostPeripherals::default());
        let shared = Arc::new(SharedState::new());
        let (player, handle) = Player::new(
            Box::new(SimulatedEngine::new(dir.path())),
            PlaylistBuilder::new(dir.path()),
            tags.clone(),
            Peripherals::host(host.clone()),
            shared.clone(),
            PlayerSettings::default(),
            Duration::from_secs(1),
        );
        Fixture {
            _dir: dir,
            player,
            handle,
            host,
            tags,
            shared,
        }
    }

    /// Let `secs` of playback pass and run housekeeping
    async fn play_for(player: &mut Player, secs: u64) {
        for _ in 0..secs {
            player.engine.advance(Duration::from_secs(1));
            player.poll().await;
        }
    }

    #[tokio::test]
    async fn test_tag_dispatch_plays_folder() {
        let mut f = fixture().await;
        f.tags.assign("1234", "/book", PlayMode::AllTracksSorted.code()).await.unwrap();

        let outcome = f.player.handle(Action::PlayTag("1234".into())).await;
        assert_eq!(outcome, CommandOutcome::Applied);
        let snap = f.player.snapshot();
        assert_eq!(snap.track_count, 3);
        assert_eq!(snap.title, "01.mp3");
        assert_eq!(snap.current_tag.as_deref(), Some("1234"));
        assert_eq!(f.host.indications(), vec![Indication::Ok]);
    }

    #[tokio::test]
    async fn test_unknown_tag_indicates_error() {
        let mut f = fixture().await;
        let outcome = f.player.handle(Action::PlayTag("999".into())).await;
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert_eq!(f.host.indications(), vec![Indication::Error]);
        assert_eq!(f.player.snapshot().current_tag.as_deref(), Some("999"));
    }

    #[tokio::test]
    async fn test_end_of_track_advances_and_finishes() {
        let mut f = fixture().await;
        f.player
            .handle(Action::PlayPath {
                path: "/book".into(),
                mode: PlayMode::AllTracksSorted,
            })
            .await;

        play_for(&mut f.player, 3).await;
        assert_eq!(f.player.state.current_track, 1);

        play_for(&mut f.player, 10).await;
        assert!(f.player.state.playlist_finished);
        assert_eq!(f.player.state.play_mode, PlayMode::NoPlaylist);
    }

    #[tokio::test]
    async fn test_next_track_reopened_by_poll() {
        let mut f = fixture().await;
        f.player
            .handle(Action::PlayPath {
                path: "/book".into(),
                mode: PlayMode::AllTracksSorted,
            })
            .await;

        f.player.handle(Action::Track(TrackCommand::NextTrack)).await;
        assert!(f.player.state.pending_open);
        f.player.poll().await;
        assert!(!f.player.state.pending_open);
        assert_eq!(f.player.state.current_track, 1);
        assert_eq!(f.player.state.title, "02.mp3");
    }

    #[tokio::test]
    async fn test_audiobook_resume_point_saved_on_pause() {
        let mut f = fixture().await;
        f.tags.assign("42", "/book", PlayMode::Audiobook.code()).await.unwrap();
        f.player.handle(Action::PlayTag("42".into())).await;
        f.player.handle(Action::Track(TrackCommand::NextTrack)).await;
        f.player.poll().await;
        play_for(&mut f.player, 1).await;

        f.player.handle(Action::Track(TrackCommand::PausePlay)).await;
        match f.tags.lookup("42").await.unwrap() {
            Some(TagRecord::Music {
                file_or_url,
                track_last_played,
                last_play_pos,
                ..
            }) => {
                assert_eq!(file_or_url, "/book");
                assert_eq!(track_last_played, 1);
                assert!(last_play_pos > 0);
            }
            other => panic!("unexpected record {:?}", other),
        }

        // Scanning again resumes at the saved track
        f.player.handle(Action::PlayTag("42".into())).await;
        assert_eq!(f.player.state.current_track, 1);
    }

    #[tokio::test]
    async fn test_volume_clamped_to_max() {
        let mut f = fixture().await;
        let mut notices = f.shared.subscribe();
        f.player.handle(Action::SetVolume(99)).await;
        assert_eq!(f.player.snapshot().volume, 21);
        f.player.handle(Action::SetVolume(-4)).await;
        assert_eq!(f.player.snapshot().volume, 0);

        let payloads = bus_payloads(&mut notices, StateTopic::Loudness);
        assert_eq!(payloads, vec!["21".to_string(), "0".to_string()]);
    }

    #[tokio::test]
    async fn test_repeat_mode_requires_playlist() {
        let mut f = fixture().await;
        assert_eq!(
            f.player.handle(Action::SetRepeatMode(2)).await,
            CommandOutcome::Rejected
        );

        f.player
            .handle(Action::PlayPath {
                path: "/book".into(),
                mode: PlayMode::AllTracksSorted,
            })
            .await;
        assert_eq!(
            f.player.handle(Action::SetRepeatMode(3)).await,
            CommandOutcome::Applied
        );
        assert!(f.player.state.repeat_track && f.player.state.repeat_playlist);
        assert_eq!(
            f.player.handle(Action::SetRepeatMode(7)).await,
            CommandOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_sleep_timer_requests() {
        let mut f = fixture().await;
        assert_eq!(
            f.player
                .handle(Action::SleepTimer(SleepTimerRequest::AfterTrack))
                .await,
            CommandOutcome::Rejected
        );

        f.player
            .handle(Action::PlayPath {
                path: "/book".into(),
                mode: PlayMode::AllTracksSorted,
            })
            .await;
        f.player
            .handle(Action::SleepTimer(SleepTimerRequest::AfterFiveTracks))
            .await;
        // Only three tracks: falls back to the end of the playlist
        assert!(f.player.state.sleep_after_playlist);
        assert_eq!(f.player.state.play_until_track, None);
        assert!(f.host.night_mode());

        assert_eq!(
            f.player
                .handle(Action::SleepTimer(SleepTimerRequest::Disable))
                .await,
            CommandOutcome::Applied
        );
        assert!(!f.player.state.sleep_after_playlist);
        assert_eq!(
            f.player
                .handle(Action::SleepTimer(SleepTimerRequest::Disable))
                .await,
            CommandOutcome::Rejected
        );

        f.player
            .handle(Action::SleepTimer(SleepTimerRequest::Minutes(15)))
            .await;
        assert_eq!(f.player.snapshot().sleep_timer_minutes, 15);
    }

    #[tokio::test]
    async fn test_sleep_after_track() {
        let mut f = fixture().await;
        f.player
            .handle(Action::PlayPath {
                path: "/book".into(),
                mode: PlayMode::AllTracksSorted,
            })
            .await;
        f.player
            .handle(Action::SleepTimer(SleepTimerRequest::AfterTrack))
            .await;
        play_for(&mut f.player, 3).await;
        assert!(f.host.sleep_requested());
        assert_eq!(f.player.state.play_mode, PlayMode::NoPlaylist);
    }

    #[tokio::test]
    async fn test_locked_controls_block_tags_but_not_unlock_module() {
        let mut f = fixture().await;
        f.tags.assign("1", "/book", PlayMode::AllTracksSorted.code()).await.unwrap();
        f.tags.assign_module("2", 100).await.unwrap();

        f.player.handle(Action::LockControls(true)).await;
        assert_eq!(
            f.player.handle(Action::PlayTag("1".into())).await,
            CommandOutcome::Rejected
        );
        assert_eq!(
            f.player.handle(Action::PlayTag("2".into())).await,
            CommandOutcome::Applied
        );
        assert!(!f.player.snapshot().controls_locked);
    }

    #[tokio::test]
    async fn test_module_commands() {
        let mut f = fixture().await;
        f.player.handle(Action::Module(176)).await;
        assert_eq!(f.player.snapshot().volume, 4);
        f.player.handle(Action::Module(175)).await;
        assert_eq!(f.player.snapshot().volume, 3);

        assert_eq!(f.player.handle(Action::Module(101)).await, CommandOutcome::Applied);
        assert_eq!(f.player.snapshot().sleep_timer_minutes, 15);
        f.player.handle(Action::Module(101)).await;
        assert_eq!(f.player.snapshot().sleep_timer_minutes, 0);

        assert_eq!(f.player.handle(Action::Module(130)).await, CommandOutcome::Rejected);
        assert_eq!(f.player.handle(Action::Module(99)).await, CommandOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_handle_round_trip_through_actor() {
        let f = fixture().await;
        let handle = f.handle.clone();
        let task = f.player.spawn();

        let outcome = handle.execute(Action::SetVolume(7)).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(handle.snapshot().volume, 7);

        drop(f.handle);
        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_title_of() {
        assert_eq!(title_of("/book/01.mp3"), "01.mp3");
        assert_eq!(title_of("http://radio.example/live"), "http://radio.example/live");
    }
}
