//! HTTP API
//!
//! Explorer, tag assignment, settings and the websocket endpoint, all served
//! by one axum router.

pub mod explorer;
pub mod handlers;
pub mod paths;
pub mod rfid;
pub mod server;
pub mod settings;

pub use server::{router, run, AppContext};
