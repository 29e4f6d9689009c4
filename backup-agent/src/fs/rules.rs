//! Include/exclude rule matching.
//!
//! A rule string is interpreted by shape:
//! - absolute (`/srv/data`): matches itself and every path below it
//! - anything else (`*.tmp`, `tmpfs`): shell glob against the base name
//! - dot-relative (`./.nobackup`): additionally matches a directory that
//!   contains an entry with that name
//!
//! Every rule also matches a candidate that is byte-for-byte equal to it,
//! which is how filesystem types are compared.

use globset::{GlobBuilder, GlobMatcher};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A single compiled selection rule
#[derive(Debug, Clone)]
pub enum SelectionRule {
    /// Absolute path prefix
    Absolute(PathBuf),

    /// Base-name glob, optionally a marker file name
    Pattern {
        raw: String,
        glob: Option<GlobMatcher>,
        marker: bool,
    },
}

impl SelectionRule {
    /// Compile a rule string. A malformed glob is reported and never
    /// matches as a glob, but still takes part in equality and marker tests.
    pub fn new(raw: &str) -> Self {
        if Path::new(raw).is_absolute() {
            return SelectionRule::Absolute(PathBuf::from(raw));
        }

        let glob = match GlobBuilder::new(raw)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
        {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                warn!("Invalid selection pattern '{}': {}", raw, e);
                None
            }
        };

        SelectionRule::Pattern {
            raw: raw.to_string(),
            glob,
            marker: raw.starts_with("./"),
        }
    }

    /// The rule as written in the configuration
    pub fn as_os_str(&self) -> &OsStr {
        match self {
            SelectionRule::Absolute(path) => path.as_os_str(),
            SelectionRule::Pattern { raw, .. } => OsStr::new(raw.as_str()),
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, SelectionRule::Absolute(_))
    }

    /// Test a candidate path (or filesystem type) against this rule.
    pub fn matches(&self, candidate: &Path) -> bool {
        let candidate_bytes = candidate.as_os_str().as_bytes();
        if self.as_os_str().as_bytes() == candidate_bytes {
            return true;
        }

        match self {
            SelectionRule::Absolute(prefix) => {
                let prefix = prefix.as_os_str().as_bytes();
                candidate_bytes.len() > prefix.len()
                    && candidate_bytes.starts_with(prefix)
                    && candidate_bytes[prefix.len()] == b'/'
            }
            SelectionRule::Pattern { raw, glob, marker } => {
                if let Some(glob) = glob {
                    if glob.is_match(Path::new(base_name(candidate))) {
                        return true;
                    }
                }
                *marker && marker_present(candidate, raw)
            }
        }
    }
}

/// An ordered list of rules; a candidate is contained if any rule matches.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<SelectionRule>,
}

impl RuleSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            rules: patterns.iter().map(|p| SelectionRule::new(p.as_ref())).collect(),
        }
    }

    pub fn contains(&self, candidate: &Path) -> bool {
        self.rules.iter().any(|rule| rule.matches(candidate))
    }

    /// Absolute rules, in configuration order
    pub fn absolute_paths(&self) -> impl Iterator<Item = &Path> {
        self.rules.iter().filter_map(|rule| match rule {
            SelectionRule::Absolute(path) => Some(path.as_path()),
            SelectionRule::Pattern { .. } => None,
        })
    }
}

/// Last path element, ignoring trailing slashes; `/` for the root.
fn base_name(path: &Path) -> &OsStr {
    let bytes = path.as_os_str().as_bytes();
    let trimmed = match bytes.iter().rposition(|b| *b != b'/') {
        Some(end) => &bytes[..=end],
        None if bytes.is_empty() => return OsStr::new("."),
        None => return OsStr::new("/"),
    };
    let start = trimmed.iter().rposition(|b| *b == b'/').map_or(0, |i| i + 1);
    OsStr::from_bytes(&trimmed[start..])
}

/// A marker matches when the named entry exists inside `dir`. Errors other
/// than "not found" count as present.
fn marker_present(dir: &Path, marker: &str) -> bool {
    match std::fs::symlink_metadata(dir.join(marker)) {
        Ok(_) => true,
        Err(e) => e.kind() != std::io::ErrorKind::NotFound,
    }
}
