//! Archive stream scanning.
//!
//! Recomputes per-backup totals from a stream: counters reset at every set
//! header, and every other record counts as one file.

use super::{
    MISSING_MARKER, NAME_KEY, SCHEDULE_KEY, SIZE_ATTRIBUTE, TYPE_ATTRIBUTE, VERSION_KEY,
    XATTR_PREFIX,
};
use crate::utils::errors::{AgentError, Result};
use crate::utils::format::format_percent;
use std::fmt;
use std::io::{self, Read};
use tar::EntryType;

/// Set header contents as read back from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfo {
    pub id: i64,
    pub name: String,
    pub schedule: String,
    pub version: Option<String>,
}

/// Totals for one backup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub files: u64,
    pub missing: u64,
    pub size: u64,
}

/// How much of a backup the authority actually holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Partial { files: u64, missing: u64 },
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completeness::Complete => write!(f, "yes"),
            Completeness::Partial { files, missing } => write!(
                f,
                "{} ({} files missing)",
                format_percent(files - missing, *files),
                missing
            ),
        }
    }
}

impl AggregateStats {
    pub fn completeness(&self) -> Completeness {
        if self.files > 0 && self.missing > 0 {
            Completeness::Partial {
                files: self.files,
                missing: self.missing,
            }
        } else {
            Completeness::Complete
        }
    }

    fn record<R: Read>(&mut self, entry: &mut tar::Entry<'_, R>) -> Result<()> {
        let mut stored_size = None;
        let mut missing = false;

        if let Some(extensions) = entry.pax_extensions().map_err(corrupt)? {
            for extension in extensions {
                let extension = extension.map_err(corrupt)?;
                let Ok(key) = extension.key() else {
                    continue;
                };
                match key.strip_prefix(XATTR_PREFIX) {
                    Some(SIZE_ATTRIBUTE) => {
                        let parsed = extension.value().ok().and_then(parse_integer);
                        stored_size = Some(parsed.and_then(|s| u64::try_from(s).ok()).unwrap_or(0));
                    }
                    Some(TYPE_ATTRIBUTE) => {
                        missing = extension.value_bytes() == MISSING_MARKER.as_bytes();
                    }
                    _ => {}
                }
            }
        }

        self.files += 1;
        self.size += stored_size.unwrap_or_else(|| entry.size());
        if missing {
            self.missing += 1;
        }
        Ok(())
    }
}

/// One backup's header (absent for records before any header) and totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub set: Option<SetInfo>,
    pub stats: AggregateStats,
}

impl BackupSummary {
    fn has_content(&self) -> bool {
        self.set.is_some() || self.stats.files > 0
    }
}

/// Receives scan progress as the stream is read.
pub trait ScanSink {
    /// A set header was read. `finished` is the backup it closes, if
    /// anything had been accumulated.
    fn set_started(&mut self, finished: Option<&BackupSummary>, set: &SetInfo) -> io::Result<()>;

    /// The stream ended; `last` is the backup still open.
    fn stream_ended(&mut self, last: &BackupSummary) -> io::Result<()>;
}

/// Sink that ignores progress
#[derive(Debug, Default)]
pub struct SilentSink;

impl ScanSink for SilentSink {
    fn set_started(&mut self, _finished: Option<&BackupSummary>, _set: &SetInfo) -> io::Result<()> {
        Ok(())
    }

    fn stream_ended(&mut self, _last: &BackupSummary) -> io::Result<()> {
        Ok(())
    }
}

/// Scan a whole stream. A record that cannot be parsed ends the scan with a
/// protocol error.
pub fn scan_archive<R: Read>(reader: R, sink: &mut dyn ScanSink) -> Result<Vec<BackupSummary>> {
    let mut summaries = Vec::new();
    let mut current = BackupSummary::default();

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;

        if entry.header().entry_type() == EntryType::XGlobalHeader {
            let set = read_set_info(&mut entry)?;
            let finished = std::mem::replace(
                &mut current,
                BackupSummary {
                    set: Some(set.clone()),
                    stats: AggregateStats::default(),
                },
            );

            if finished.has_content() {
                sink.set_started(Some(&finished), &set)?;
                summaries.push(finished);
            } else {
                sink.set_started(None, &set)?;
            }
        } else {
            current.stats.record(&mut entry)?;
        }
    }

    sink.stream_ended(&current)?;
    summaries.push(current);
    Ok(summaries)
}

fn read_set_info<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<SetInfo> {
    let header = entry.header();
    let mut info = SetInfo {
        id: header.mtime().map_err(corrupt)? as i64,
        name: String::from_utf8_lossy(&header.path_bytes()).into_owned(),
        schedule: header
            .link_name_bytes()
            .map(|link| String::from_utf8_lossy(&link).into_owned())
            .unwrap_or_default(),
        version: None,
    };

    let mut data = Vec::new();
    entry.read_to_end(&mut data).map_err(corrupt)?;
    for extension in tar::PaxExtensions::new(&data) {
        let extension = extension.map_err(corrupt)?;
        let Ok(key) = extension.key() else {
            continue;
        };
        let value = String::from_utf8_lossy(extension.value_bytes()).into_owned();
        match key {
            NAME_KEY => info.name = value,
            SCHEDULE_KEY => info.schedule = value,
            VERSION_KEY => info.version = Some(value),
            _ => {}
        }
    }

    Ok(info)
}

/// Parse an integer with an optional sign and `0x`, `0o`, `0b` or leading-zero
/// octal prefix.
pub fn parse_integer(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..])
    } else {
        (10, lower.as_str())
    };

    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }
    let value = i64::from_str_radix(body, radix).ok()?;
    Some(if negative { -value } else { value })
}

fn corrupt(e: io::Error) -> AgentError {
    AgentError::Protocol(format!("corrupt archive record: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{pax, SetHeader};
    use tar::Header;

    fn set_entry(builder: &mut tar::Builder<Vec<u8>>, id: i64, name: &str, schedule: &str) {
        let set = SetHeader::new(id, name, schedule);
        let data = pax::encode_records([
            (NAME_KEY, set.name.as_bytes()),
            (SCHEDULE_KEY, set.schedule.as_bytes()),
            (VERSION_KEY, set.version.as_bytes()),
        ]);
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::XGlobalHeader);
        header.set_path(name).unwrap();
        header.set_link_name(schedule).unwrap();
        header.set_mtime(id as u64);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
    }

    fn file_entry(builder: &mut tar::Builder<Vec<u8>>, path: &str, size: u64, attrs: &[(&str, &str)]) {
        if !attrs.is_empty() {
            let keys: Vec<(String, &str)> = attrs
                .iter()
                .map(|(k, v)| (format!("{}{}", XATTR_PREFIX, k), *v))
                .collect();
            builder
                .append_pax_extensions(keys.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
                .unwrap();
        }

        let content = vec![b'x'; size as usize];
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_path(path).unwrap();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, content.as_slice()).unwrap();
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<(Option<AggregateStats>, String)>,
        ended: Option<AggregateStats>,
    }

    impl ScanSink for Recorder {
        fn set_started(&mut self, finished: Option<&BackupSummary>, set: &SetInfo) -> io::Result<()> {
            self.started.push((finished.map(|f| f.stats), set.name.clone()));
            Ok(())
        }

        fn stream_ended(&mut self, last: &BackupSummary) -> io::Result<()> {
            self.ended = Some(last.stats);
            Ok(())
        }
    }

    #[test]
    fn test_sizes_from_attributes_and_missing_marker() {
        let mut builder = tar::Builder::new(Vec::new());
        set_entry(&mut builder, 1_700_000_000, "web01", "daily");
        file_entry(&mut builder, "etc/hosts", 0, &[("backup.size", "1000"), ("backup.type", "f")]);
        file_entry(&mut builder, "etc/gone", 0, &[("backup.size", "0x10"), ("backup.type", "?")]);
        let data = builder.into_inner().unwrap();

        let summaries = scan_archive(data.as_slice(), &mut SilentSink).unwrap();
        assert_eq!(summaries.len(), 1);

        let summary = &summaries[0];
        let set = summary.set.as_ref().unwrap();
        assert_eq!(set.id, 1_700_000_000);
        assert_eq!(set.name, "web01");
        assert_eq!(set.schedule, "daily");
        assert_eq!(set.version.as_deref(), Some(crate::archive::format_version().as_str()));
        assert_eq!(
            summary.stats,
            AggregateStats {
                files: 2,
                missing: 1,
                size: 1016
            }
        );
        assert_eq!(
            summary.stats.completeness(),
            Completeness::Partial { files: 2, missing: 1 }
        );
    }

    #[test]
    fn test_declared_size_when_no_attribute() {
        let mut builder = tar::Builder::new(Vec::new());
        set_entry(&mut builder, 42, "db", "weekly");
        file_entry(&mut builder, "a", 300, &[]);
        file_entry(&mut builder, "b", 12, &[]);
        let data = builder.into_inner().unwrap();

        let summaries = scan_archive(data.as_slice(), &mut SilentSink).unwrap();
        assert_eq!(summaries[0].stats.files, 2);
        assert_eq!(summaries[0].stats.size, 312);
        assert_eq!(summaries[0].stats.completeness(), Completeness::Complete);
    }

    #[test]
    fn test_counters_reset_at_each_set_header() {
        let mut builder = tar::Builder::new(Vec::new());
        set_entry(&mut builder, 100, "first", "daily");
        file_entry(&mut builder, "a", 5, &[]);
        file_entry(&mut builder, "b", 5, &[]);
        set_entry(&mut builder, 200, "second", "daily");
        file_entry(&mut builder, "c", 7, &[]);
        let data = builder.into_inner().unwrap();

        let mut recorder = Recorder::default();
        let summaries = scan_archive(data.as_slice(), &mut recorder).unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].stats.files, 2);
        assert_eq!(summaries[1].stats, AggregateStats { files: 1, missing: 0, size: 7 });

        assert_eq!(recorder.started.len(), 2);
        assert_eq!(recorder.started[0], (None, "first".to_string()));
        assert_eq!(recorder.started[1].0.map(|s| s.files), Some(2));
        assert_eq!(recorder.ended.map(|s| s.size), Some(7));
    }

    #[test]
    fn test_unparsable_size_attribute_counts_nothing() {
        let mut builder = tar::Builder::new(Vec::new());
        set_entry(&mut builder, 1, "x", "daily");
        file_entry(&mut builder, "a", 50, &[("backup.size", "lots")]);
        let data = builder.into_inner().unwrap();

        let summaries = scan_archive(data.as_slice(), &mut SilentSink).unwrap();
        assert_eq!(summaries[0].stats.files, 1);
        assert_eq!(summaries[0].stats.size, 0);
    }

    #[test]
    fn test_empty_stream() {
        let summaries = scan_archive(&[0u8; 1024][..], &mut SilentSink).unwrap();
        assert_eq!(summaries, vec![BackupSummary::default()]);
    }

    #[test]
    fn test_corrupt_header_is_protocol_error() {
        let mut data = vec![0u8; 1024];
        data[..8].copy_from_slice(b"garbage!");
        data[148..156].copy_from_slice(b"1234567\0");
        let result = scan_archive(data.as_slice(), &mut SilentSink);
        assert!(matches!(result, Err(AgentError::Protocol(_))));
    }

    #[test]
    fn test_parse_integer_prefixes() {
        assert_eq!(parse_integer("1024"), Some(1024));
        assert_eq!(parse_integer("0x1F"), Some(31));
        assert_eq!(parse_integer("0o17"), Some(15));
        assert_eq!(parse_integer("017"), Some(15));
        assert_eq!(parse_integer("0b101"), Some(5));
        assert_eq!(parse_integer("-12"), Some(-12));
        assert_eq!(parse_integer("0"), Some(0));
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("12abc"), None);
        assert_eq!(parse_integer("--1"), None);
    }

    #[test]
    fn test_completeness_display() {
        let partial = AggregateStats { files: 40, missing: 1, size: 0 }.completeness();
        assert_eq!(partial.to_string(), "97.5% (1 files missing)");
        assert_eq!(AggregateStats::default().completeness().to_string(), "yes");
    }
}
