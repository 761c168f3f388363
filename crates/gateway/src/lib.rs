//! The voxgate gateway: per-connection transport loop, the per-turn
//! orchestrator pipeline, and the HTTP/WebSocket surface.

pub mod cli;
pub mod connection;
pub mod http;
pub mod media;
pub mod runtime;
pub mod state;
