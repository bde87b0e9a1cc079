//! Playback control
//!
//! The [`player::Player`] actor owns all playback state; transport commands
//! go through the [`track_control`] state machine.

pub mod engine;
pub mod player;
pub mod playlist;
pub mod track_control;

pub use player::{Player, PlayerHandle, PlayerSnapshot};
