//! Persistent key-value storage

pub mod init;
pub mod kv;

pub use init::*;
pub use kv::*;
