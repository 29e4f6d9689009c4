//! Archive stream emission.
//!
//! A backup stream starts with one global PAX header (the set header) and
//! continues with one ustar record per selected path. Logical paths are
//! absolute; names and link targets that do not fit the 100-byte header
//! fields are repeated in a local PAX header, as are extended attributes.

use super::pax;
use super::{SetHeader, NAME_KEY, SCHEDULE_KEY, VERSION_KEY, XATTR_PREFIX};
use crate::fs::attributes::AttributeProvider;
use crate::fs::metadata::{FileRecord, OwnerNames, RecordKind, SpecialFile};
use crate::utils::errors::{AgentError, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use tar::{EntryType, Header};
use tracing::{debug, warn};

const NAME_FIELD_LEN: usize = 100;
const OWNER_FIELD_LEN: usize = 32;

/// Outcome of appending one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Record written with this many content bytes
    Written(u64),
    /// Path could not be described and was left out
    Skipped,
}

/// Writes a backup archive to any byte sink.
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<W>,
    attributes: Arc<dyn AttributeProvider>,
    owners: OwnerNames,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W, attributes: Arc<dyn AttributeProvider>) -> Self {
        Self {
            builder: tar::Builder::new(inner),
            attributes,
            owners: OwnerNames::new(),
        }
    }

    /// Emit the set header that opens one backup's records.
    pub fn write_set_header(&mut self, set: &SetHeader) -> io::Result<()> {
        let data = pax::encode_records([
            (NAME_KEY, set.name.as_bytes()),
            (SCHEDULE_KEY, set.schedule.as_bytes()),
            (VERSION_KEY, set.version.as_bytes()),
        ]);

        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::XGlobalHeader);
        set_field(&mut header.as_old_mut().name, set.name.as_bytes());
        set_field(&mut header.as_old_mut().linkname, set.schedule.as_bytes());
        header.set_mtime(set.id.max(0) as u64);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();

        self.builder.append(&header, data.as_slice())
    }

    /// Append one path. Paths whose metadata or content cannot be opened are
    /// skipped; a failure after the header is written is fatal, since the
    /// stream can no longer be framed.
    pub fn append_path(&mut self, path: &Path) -> Result<Appended> {
        let record = match FileRecord::from_path(path, &mut self.owners) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), "Couldn't backup: {}", e);
                return Ok(Appended::Skipped);
            }
        };

        let content = if record.kind.carries_content() {
            match File::open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), "Couldn't open: {}", e);
                    return Ok(Appended::Skipped);
                }
            }
        } else {
            None
        };

        self.append_record(&record, content)
    }

    fn append_record(&mut self, record: &FileRecord, content: Option<File>) -> Result<Appended> {
        let path_bytes = record.path.as_os_str().as_bytes();
        let link_bytes = record
            .link_target
            .as_ref()
            .map(|target| target.as_os_str().as_bytes());

        let mut extensions: Vec<(String, Vec<u8>)> = Vec::new();
        if path_bytes.len() > NAME_FIELD_LEN {
            extensions.push(("path".to_string(), path_bytes.to_vec()));
        }
        if let Some(link) = link_bytes.filter(|link| link.len() > NAME_FIELD_LEN) {
            extensions.push(("linkpath".to_string(), link.to_vec()));
        }
        if let Some(user) = record.user_name.as_ref().filter(|u| u.len() > OWNER_FIELD_LEN) {
            extensions.push(("uname".to_string(), user.as_bytes().to_vec()));
        }
        if let Some(group) = record.group_name.as_ref().filter(|g| g.len() > OWNER_FIELD_LEN) {
            extensions.push(("gname".to_string(), group.as_bytes().to_vec()));
        }
        for (name, value) in self.attributes.all(&record.path) {
            extensions.push((format!("{}{}", XATTR_PREFIX, name), value));
        }
        if !extensions.is_empty() {
            self.builder
                .append_pax_extensions(extensions.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
        }

        let header = record_header(record, path_bytes, link_bytes)?;

        match content {
            Some(file) => {
                let reader = ExactReader::new(file, record.size);
                self.builder
                    .append(&header, reader)
                    .map_err(|source| AgentError::ShortWrite {
                        path: record.path.clone(),
                        expected: record.size,
                        source,
                    })?;
                debug!(path = %record.path.display(), bytes = record.size, "Sent file");
                Ok(Appended::Written(record.size))
            }
            None => {
                self.builder.append(&header, io::empty())?;
                Ok(Appended::Written(0))
            }
        }
    }

    /// Write the end-of-archive marker and return the sink.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()
    }
}

fn record_header(record: &FileRecord, path: &[u8], link: Option<&[u8]>) -> io::Result<Header> {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type(record.kind));
    set_field(&mut header.as_old_mut().name, path);
    if let Some(link) = link {
        set_field(&mut header.as_old_mut().linkname, link);
    }

    header.set_size(record.size);
    header.set_mode(record.mode);
    header.set_uid(record.uid as u64);
    header.set_gid(record.gid as u64);
    header.set_mtime(record.mtime.max(0) as u64);

    // Longer names travel as PAX uname/gname records instead.
    if let Some(user) = record.user_name.as_ref().filter(|u| u.len() <= OWNER_FIELD_LEN) {
        header.set_username(user)?;
    }
    if let Some(group) = record.group_name.as_ref().filter(|g| g.len() <= OWNER_FIELD_LEN) {
        header.set_groupname(group)?;
    }
    if let Some((major, minor)) = record.device {
        header.set_device_major(major as u32)?;
        header.set_device_minor(minor as u32)?;
    }

    header.set_cksum();
    Ok(header)
}

fn entry_type(kind: RecordKind) -> EntryType {
    match kind {
        RecordKind::Regular => EntryType::Regular,
        RecordKind::Directory => EntryType::Directory,
        RecordKind::Symlink => EntryType::Symlink,
        RecordKind::Other(SpecialFile::CharDevice) => EntryType::Char,
        RecordKind::Other(SpecialFile::BlockDevice) => EntryType::Block,
        RecordKind::Other(SpecialFile::Fifo) => EntryType::Fifo,
    }
}

/// Copy `value` into a fixed header field, truncating and NUL-padding.
fn set_field(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
    field[len..].fill(0);
}

/// Yields exactly `expected` bytes, or fails if the source ends early.
struct ExactReader<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, expected: u64) -> Self {
        Self {
            inner: inner.take(expected),
            remaining: expected,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} bytes short", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
