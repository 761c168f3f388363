//! The playbook: a stage machine wrapped around the LLM step.
//!
//! Static configuration (stages, transitions, tool allowlists) is loaded
//! once and validated; per-session runtime state (current stage, turn
//! counter) lives on the session. The engine evaluates transitions after
//! each finalized response; the registry executes tool calls.

pub mod config;
pub mod engine;
pub mod registry;

pub use config::{HistoryPolicy, Playbook, Stage, Transition, TransitionCondition};
pub use engine::{
    evaluate_transitions, transition_tool_definition, RequestedTransition, TransitionMatch,
    TurnRecord, TRANSITION_TOOL,
};
pub use registry::{ToolHandler, ToolRegistry};
