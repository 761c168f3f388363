//! Headless client for a voxgate server: the connection lifecycle state
//! machine with exponential-backoff reconnection and session recovery.
//!
//! The actual wire transport sits behind the [`Transport`] trait so the
//! lifecycle can be driven (and tested) independently of WebSockets.

pub mod client;
pub mod reconnect;
pub mod transport;

pub use client::{ClientConfig, ClientEvent, ConnectionState, VoiceClient};
pub use reconnect::ReconnectPolicy;
pub use transport::{Transport, TransportLink, WsTransport};
