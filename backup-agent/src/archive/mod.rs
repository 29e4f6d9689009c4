//! Backup archive stream format.
//!
//! Streams are tar archives. A global PAX header opens each backup and
//! carries its name, schedule and format version; its timestamp is the
//! backup identifier. Per-file metadata the authority adds (such as stored
//! size and type) arrives as extended attributes.

pub mod pax;
pub mod scan;
pub mod writer;

pub use scan::{
    scan_archive, AggregateStats, BackupSummary, Completeness, ScanSink, SetInfo, SilentSink,
};
pub use writer::{Appended, ArchiveWriter};

/// Set header PAX key for the backup name
pub const NAME_KEY: &str = ".name";
/// Set header PAX key for the schedule
pub const SCHEDULE_KEY: &str = ".schedule";
/// Set header PAX key for the format version
pub const VERSION_KEY: &str = ".version";

/// PAX key prefix carrying extended attributes
pub const XATTR_PREFIX: &str = "SCHILY.xattr.";

/// Attribute with the stored size of a file
pub const SIZE_ATTRIBUTE: &str = "backup.size";
/// Attribute with the stored type of a file
pub const TYPE_ATTRIBUTE: &str = "backup.type";
/// `backup.type` value for files the authority could not store
pub const MISSING_MARKER: &str = "?";

/// Format version written into set headers
pub fn format_version() -> String {
    format!(
        "{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

/// Metadata opening one backup's records in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetHeader {
    /// Backup identifier, also the header timestamp
    pub id: i64,
    pub name: String,
    pub schedule: String,
    pub version: String,
}

impl SetHeader {
    pub fn new(id: i64, name: &str, schedule: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            schedule: schedule.to_string(),
            version: format_version(),
        }
    }
}
