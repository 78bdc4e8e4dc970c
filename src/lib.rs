//! # slsk-client
//!
//! Client core for the SoulSeek peer-to-peer protocol.
//!
//! The codec half (`protocol`, `server`, `peer`, `peer_init`, `shares`,
//! `frame`) encodes and decodes every message this client speaks. The
//! runtime half (`session`, `listen`, `registry`, `handshake`, `client`)
//! keeps one connection to the central server, accepts and dials peer
//! connections, and delivers peer messages once a connection exists.

pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod frame;
pub mod protocol;

pub mod peer;
pub mod peer_init;
pub mod server;
pub mod shares;

pub mod client;
pub mod handshake;
pub mod listen;
pub mod registry;
pub mod session;

/// Correlates a peer connection across the server, the handshake and the
/// registry.
pub type Token = i32;

pub use client::{Client, LoginInfo};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use event::ClientEvent;
pub use handshake::HandshakeState;
pub use protocol::{MessageRead, MessageWrite, ProtocolRead, ProtocolWrite};
