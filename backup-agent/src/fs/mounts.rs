//! Mount table snapshot.
//!
//! Parses the `mntent` text format used by `/etc/mtab` and
//! `/proc/self/mounts`.

use std::path::{Path, PathBuf};
use tracing::warn;

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device or pseudo-filesystem source
    pub device: String,

    /// Mount point
    pub directory: PathBuf,

    /// Filesystem types, as listed (usually a single entry)
    pub types: Vec<String>,

    /// Mount options
    pub options: Vec<String>,
}

impl MountEntry {
    /// The filesystem type rules are matched against.
    pub fn fs_type(&self) -> &str {
        self.types.first().map(String::as_str).unwrap_or("")
    }
}

/// Read and parse a mount table.
///
/// An unreadable table yields no entries; selection still proceeds from
/// absolute include rules.
pub fn read_mount_table(path: &Path) -> Vec<MountEntry> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_mount_table(&content),
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Parse mount table text. Malformed lines are skipped.
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split_whitespace();
    let device = unescape(fields.next()?);
    let directory = PathBuf::from(unescape(fields.next()?));
    let types = unescape(fields.next()?)
        .split(',')
        .map(str::to_string)
        .collect();
    let options = fields
        .next()
        .map(|o| unescape(o).split(',').map(str::to_string).collect())
        .unwrap_or_default();

    Some(MountEntry {
        device,
        directory,
        types,
        options,
    })
}

/// Decode the three-digit octal escapes the kernel uses for whitespace and
/// backslashes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(digits: &[u8]) -> bool {
    digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
