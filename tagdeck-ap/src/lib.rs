//! # tagdeck control core (tagdeck-ap)
//!
//! Control core of a tag-triggered audio player.
//!
//! **Purpose:** Map scanned tags to playlists, drive playback through a
//! single player actor, accept streamed uploads to storage, and bridge the
//! player to websocket clients and a message bus.
//!
//! **Architecture:** One player task drains one action queue. Every ingress
//! (HTTP, websocket, message bus) decodes into the same `Action` surface and
//! state changes fan out as notices on a broadcast channel.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod peripherals;
pub mod playback;
pub mod settings;
pub mod state;
pub mod tags;
pub mod upload;

pub use error::{Error, Result};
pub use state::SharedState;
