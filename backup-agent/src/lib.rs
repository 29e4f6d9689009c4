//! Host backup agent library
//!
//! Selects files from mount-aware include/exclude rules, reserves a backup
//! with a local or SSH-reached authority, and streams the selection to it as
//! a tar archive. Archive streams returned by the authority can be scanned
//! back into per-backup totals.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::inspect::{InfoQuery, InspectionEngine, TextReport};
pub use executor::{BackupJob, TransferEngine};
pub use fs::{BackupSet, SelectionResolver};
pub use utils::errors::{AgentError, Result};
