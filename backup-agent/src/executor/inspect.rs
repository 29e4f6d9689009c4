//! Backup inspection: asks the authority for a backup's archive stream and
//! reports what it holds.

use crate::archive::{scan_archive, AggregateStats, BackupSummary, ScanSink, SetInfo};
use crate::transport::Transport;
use crate::utils::errors::Result;
use crate::utils::format::format_bytes;
use chrono::{Local, TimeZone};
use std::io::{self, BufReader, Write};
use tokio_util::io::SyncIoBridge;
use tracing::debug;

/// Which backups to ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoQuery {
    /// One backup by identifier
    Date(i64),
    /// Every backup with this name
    Name(String),
}

impl InfoQuery {
    fn args(&self) -> Vec<String> {
        match self {
            InfoQuery::Date(id) => vec!["-date".to_string(), id.to_string()],
            InfoQuery::Name(name) => vec!["-name".to_string(), name.clone()],
        }
    }
}

/// Runs `backupinfo` and scans the stream it returns.
pub struct InspectionEngine {
    transport: Box<dyn Transport>,
}

impl InspectionEngine {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Scan the backups matching `query`, feeding progress to `sink`. The sink
    /// is handed back with the per-backup summaries.
    pub async fn inspect<S>(&self, query: &InfoQuery, sink: S) -> Result<(Vec<BackupSummary>, S)>
    where
        S: ScanSink + Send + 'static,
    {
        let mut session = self.transport.open("backupinfo", &query.args())?;
        drop(session.take_stdin()?);
        let bridge = SyncIoBridge::new(session.take_stdout()?);

        let scanned = tokio::task::spawn_blocking(move || -> Result<(Vec<BackupSummary>, S)> {
            let mut sink = sink;
            let mut reader = BufReader::new(bridge);
            let summaries = scan_archive(&mut reader, &mut sink)?;

            // Padding after the end-of-archive marker.
            let trailing = io::copy(&mut reader, &mut io::sink())?;
            debug!(trailing, "Archive stream finished");
            Ok((summaries, sink))
        })
        .await??;

        session.wait().await?;
        Ok(scanned)
    }
}

/// Writes the operator-facing inspection report.
pub struct TextReport<W: Write> {
    out: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_totals(&mut self, stats: &AggregateStats) -> io::Result<()> {
        writeln!(self.out, "Files: {}", stats.files)?;
        writeln!(self.out, "Size: {}", format_bytes(stats.size))?;
        writeln!(self.out, "Complete: {}", stats.completeness())?;
        self.out.flush()
    }
}

impl<W: Write> ScanSink for TextReport<W> {
    fn set_started(&mut self, finished: Option<&BackupSummary>, set: &SetInfo) -> io::Result<()> {
        if let Some(finished) = finished {
            self.write_totals(&finished.stats)?;
        }
        writeln!(self.out)?;
        writeln!(self.out, "Name: {}", set.name)?;
        writeln!(self.out, "Schedule: {}", set.schedule)?;
        writeln!(self.out, "Date: {} ({})", set.id, local_time(set.id))
    }

    fn stream_ended(&mut self, last: &BackupSummary) -> io::Result<()> {
        self.write_totals(&last.stats)
    }
}

fn local_time(id: i64) -> String {
    match Local.timestamp_opt(id, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        None => "invalid time".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake_authority::FakeAuthority;
    use crate::executor::{BackupJob, TransferEngine};
    use crate::fs::attributes::NoAttributes;
    use crate::fs::BackupSet;
    use crate::utils::errors::AgentError;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_query_args() {
        assert_eq!(InfoQuery::Date(1700000000).args(), vec!["-date", "1700000000"]);
        assert_eq!(InfoQuery::Name("web01".into()).args(), vec!["-name", "web01"]);
    }

    #[test]
    fn test_report_layout() {
        let mut report = TextReport::new(Vec::new());
        let set = SetInfo {
            id: 0,
            name: "web01".to_string(),
            schedule: "daily".to_string(),
            version: None,
        };
        report.set_started(None, &set).unwrap();
        report
            .stream_ended(&BackupSummary {
                set: Some(set),
                stats: AggregateStats {
                    files: 40,
                    missing: 1,
                    size: 1536,
                },
            })
            .unwrap();

        let text = String::from_utf8(report.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "Name: web01");
        assert_eq!(lines[2], "Schedule: daily");
        assert!(lines[3].starts_with("Date: 0 ("));
        assert_eq!(lines[4], "Files: 40");
        assert_eq!(lines[5], "Size: 1.5KiB");
        assert_eq!(lines[6], "Complete: 97.5% (1 files missing)");
    }

    #[test]
    fn test_report_flushes_previous_set() {
        let mut report = TextReport::new(Vec::new());
        let first = SetInfo {
            id: 1,
            name: "a".to_string(),
            schedule: "daily".to_string(),
            version: None,
        };
        let second = SetInfo {
            id: 2,
            name: "b".to_string(),
            ..first.clone()
        };
        report.set_started(None, &first).unwrap();
        let finished = BackupSummary {
            set: Some(first),
            stats: AggregateStats {
                files: 3,
                missing: 0,
                size: 3,
            },
        };
        report.set_started(Some(&finished), &second).unwrap();

        let text = String::from_utf8(report.into_inner()).unwrap();
        let name_a = text.find("Name: a").unwrap();
        let files = text.find("Files: 3").unwrap();
        let name_b = text.find("Name: b").unwrap();
        assert!(name_a < files && files < name_b);
        assert!(text.contains("Size: 3B\nComplete: yes\n"));
    }

    #[tokio::test]
    async fn test_inspection_round_trip() {
        let authority = FakeAuthority::new(r"1700000000\n0\n");
        let files = TempDir::new().unwrap();
        let hosts = files.path().join("hosts");
        let ssh_config = files.path().join("ssh_config");
        fs::write(&hosts, vec![b'h'; 1000]).unwrap();
        fs::write(&ssh_config, vec![b's'; 2048]).unwrap();
        let set: BackupSet = [hosts, ssh_config].into_iter().collect();

        let job = BackupJob {
            name: "web01".to_string(),
            schedule: "daily".to_string(),
        };
        TransferEngine::new(authority.transport(), Arc::new(NoAttributes))
            .run(&job, &set)
            .await
            .unwrap();

        let engine = InspectionEngine::new(authority.transport());
        let (summaries, report) = engine
            .inspect(&InfoQuery::Date(1700000000), TextReport::new(Vec::new()))
            .await
            .unwrap();

        assert_eq!(
            authority.read("backupinfo.args").as_deref(),
            Some("-date 1700000000\n")
        );
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].stats,
            AggregateStats {
                files: 2,
                missing: 0,
                size: 3048
            }
        );

        let text = String::from_utf8(report.into_inner()).unwrap();
        assert!(text.contains("Name: web01\nSchedule: daily\nDate: 1700000000 ("));
        assert!(text.ends_with("Files: 2\nSize: 3.0KiB\nComplete: yes\n"));
    }

    #[tokio::test]
    async fn test_inspection_of_garbage_is_protocol_error() {
        let authority = FakeAuthority::new(r"1\n");
        fs::write(authority.path("archive.tar"), vec![b'x'; 1024]).unwrap();

        let engine = InspectionEngine::new(authority.transport());
        let result = engine
            .inspect(&InfoQuery::Name("web01".into()), TextReport::new(Vec::new()))
            .await;
        assert!(matches!(result, Err(AgentError::Protocol(_))));
    }
}
