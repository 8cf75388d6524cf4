// Status line daemon and its producer, shared between both binaries

pub mod address;
pub mod channel;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod logging;
pub mod render;
pub mod shell_integration;
