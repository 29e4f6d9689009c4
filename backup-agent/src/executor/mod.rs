//! Backup job executor - reserves a backup with the authority and streams
//! the selected files to it.
//!
//! A run has two phases, each on its own session:
//! - `newbackup`: the backup set is sent one path per line and the authority
//!   answers with the new backup identifier
//! - `submitfiles`: the set header and one record per path are streamed as
//!   an archive

pub mod inspect;

use crate::archive::{Appended, ArchiveWriter, SetHeader};
use crate::fs::attributes::AttributeProvider;
use crate::fs::BackupSet;
use crate::transport::Transport;
use crate::utils::errors::{AgentError, Result};
use crate::utils::format::format_bytes;
use std::io::{BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::SyncIoBridge;
use tracing::{info, warn};

/// Backup job configuration
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub name: String,
    pub schedule: String,
}

/// Identifier handed out by the authority for a new backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub id: i64,
    /// Most recent earlier backup of the same name, if the authority has one
    pub previous: Option<i64>,
}

/// Counters for one streamed archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Backup execution result
#[derive(Debug, Clone, Copy)]
pub struct BackupResult {
    pub reservation: Reservation,
    pub transfer: TransferStats,
    pub duration_secs: u64,
}

/// Drives both phases of a backup over a transport.
pub struct TransferEngine {
    transport: Box<dyn Transport>,
    attributes: Arc<dyn AttributeProvider>,
}

impl TransferEngine {
    pub fn new(transport: Box<dyn Transport>, attributes: Arc<dyn AttributeProvider>) -> Self {
        Self {
            transport,
            attributes,
        }
    }

    /// Reserve a backup and stream `set` into it.
    pub async fn run(&self, job: &BackupJob, set: &BackupSet) -> Result<BackupResult> {
        let start = Instant::now();

        let reservation = self.reserve(job, set).await?;
        let transfer = self.submit(job, reservation.id, set).await?;

        let result = BackupResult {
            reservation,
            transfer,
            duration_secs: start.elapsed().as_secs(),
        };
        info!(
            "Backup {} complete: {} files, {} sent, {} skipped in {}s",
            reservation.id,
            transfer.files,
            format_bytes(transfer.bytes),
            transfer.skipped,
            result.duration_secs
        );
        Ok(result)
    }

    /// Announce the backup set and obtain a backup identifier.
    pub async fn reserve(&self, job: &BackupJob, set: &BackupSet) -> Result<Reservation> {
        let args = vec![
            "-name".to_string(),
            job.name.clone(),
            "-schedule".to_string(),
            job.schedule.clone(),
        ];
        let mut session = self.transport.open("newbackup", &args)?;
        let mut stdin = session.take_stdin()?;
        let stdout = session.take_stdout()?;

        let mut listing = Vec::new();
        for path in set.iter() {
            listing.extend_from_slice(path.as_os_str().as_bytes());
            listing.push(b'\n');
        }

        // The authority may answer before it has read the whole listing.
        let send = async move {
            stdin.write_all(&listing).await?;
            stdin.shutdown().await
        };
        let (sent, reply) = tokio::join!(send, read_reservation(BufReader::new(stdout)));

        let reservation = reply?;
        sent?;
        session.wait().await?;

        info!("New backup: date={} files={}", reservation.id, set.len());
        if let Some(previous) = reservation.previous {
            info!("Previous backup: date={}", previous);
        }
        Ok(reservation)
    }

    /// Stream the set header and every path of `set` as backup `id`.
    pub async fn submit(&self, job: &BackupJob, id: i64, set: &BackupSet) -> Result<TransferStats> {
        let args = vec![
            "-name".to_string(),
            job.name.clone(),
            "-date".to_string(),
            id.to_string(),
        ];
        let mut session = self.transport.open("submitfiles", &args)?;
        let stdin = session.take_stdin()?;
        let mut stdout = session.take_stdout()?;

        // Whatever the authority prints is not part of the protocol.
        let drain = tokio::spawn(async move { tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await });

        let header = SetHeader::new(id, &job.name, &job.schedule);
        let paths: Vec<PathBuf> = set.iter().map(|p| p.to_path_buf()).collect();
        let attributes = self.attributes.clone();
        let bridge = SyncIoBridge::new(stdin);

        let stats = tokio::task::spawn_blocking(move || -> Result<TransferStats> {
            let mut writer = ArchiveWriter::new(BufWriter::new(bridge), attributes);
            writer.write_set_header(&header)?;

            let mut stats = TransferStats::default();
            for path in &paths {
                match writer.append_path(path)? {
                    Appended::Written(bytes) => {
                        stats.files += 1;
                        stats.bytes += bytes;
                    }
                    Appended::Skipped => stats.skipped += 1,
                }
            }

            let mut sink = writer.finish()?;
            sink.flush()?;
            Ok(stats)
        })
        .await??;

        drain.await??;
        session.wait().await?;

        if stats.skipped > 0 {
            warn!("{} paths could not be sent", stats.skipped);
        }
        Ok(stats)
    }
}

/// Parse the `newbackup` reply: an identifier line, then either the
/// rejection message (identifier 0) or an optional previous identifier.
pub async fn read_reservation<R: AsyncBufRead + Unpin>(reader: R) -> Result<Reservation> {
    let mut lines = reader.lines();

    let first = lines
        .next_line()
        .await?
        .ok_or_else(|| AgentError::Protocol("no reply to newbackup".to_string()))?;
    let id: i64 = first
        .trim()
        .parse()
        .map_err(|_| AgentError::Protocol(format!("invalid backup identifier {:?}", first)))?;

    if id == 0 {
        let message = lines.next_line().await?.unwrap_or_default();
        return Err(AgentError::Rejected(message));
    }

    let previous = match lines.next_line().await {
        Ok(Some(line)) => line.trim().parse::<i64>().ok().filter(|p| *p > 0),
        _ => None,
    };

    Ok(Reservation { id, previous })
}
