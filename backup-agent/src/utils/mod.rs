//! Utility modules for the backup agent.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{AgentError, Result};
