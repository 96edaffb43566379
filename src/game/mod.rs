//! Game state module
//!
//! Run phases and flags, session statistics and the operator activity log.

pub mod journal;
pub mod state;
pub mod stats;

pub use journal::{Journal, LogEntry, LogLevel};
pub use state::{Phase, RunState, RunStatus};
pub use stats::{SessionStats, SharedStats};
