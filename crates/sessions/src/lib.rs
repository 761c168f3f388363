//! Session state for voxgate: conversation history, pending vision
//! attachments, the active turn's cancellation token, and the manager
//! that owns the `id → Session` map with TTL eviction.

pub mod cancel;
pub mod session;
pub mod store;

pub use cancel::TurnToken;
pub use session::{Session, SessionPrototype, StageState};
pub use store::{spawn_sweeper, SessionManager};
