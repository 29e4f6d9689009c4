//! Filesystem side of the agent: mount table, rules, selection and
//! per-file metadata.

pub mod attributes;
pub mod metadata;
pub mod mounts;
pub mod rules;
pub mod selection;

pub use selection::{BackupSet, SelectionResolver};
