//! # tagdeck Common Library
//!
//! Shared code for the tagdeck control core:
//! - Error type and result alias
//! - Configuration file and data directory resolution
//! - Domain enums shared by every ingress (play-mode, track commands,
//!   repeat modes, state broadcast categories)
//! - Namespaced key-value store backed by sqlite

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{PlayMode, RepeatMode, StateCategory, TrackCommand};
