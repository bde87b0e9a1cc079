//! Remote command bridge
//!
//! Two ingress paths (websocket frames, message-bus topics) decode into the
//! shared [`action::Action`] surface; state goes back out as rendered
//! documents to websocket clients and plain payloads to the bus.

pub mod action;
pub mod bus;
pub mod bus_client;
pub mod remote;
pub mod render;
pub mod ws;
