//! Shared types for all voxgate crates: conversation messages, turn events,
//! the wire protocol, the error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod stream;

pub use error::{Error, ErrorCode, Result};
