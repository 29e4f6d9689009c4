//! File metadata handling for archive records.
//!
//! Metadata is read without following symlinks so each record describes the
//! directory entry itself.

use nix::unistd::{Gid, Group, Uid, User};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Special files that carry no content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialFile {
    CharDevice,
    BlockDevice,
    Fifo,
}

/// What kind of entry a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Regular,
    Directory,
    Symlink,
    Other(SpecialFile),
}

impl RecordKind {
    /// Classify a file type. Sockets have no archive representation.
    pub fn from_file_type(file_type: fs::FileType) -> Option<Self> {
        if file_type.is_file() {
            Some(RecordKind::Regular)
        } else if file_type.is_dir() {
            Some(RecordKind::Directory)
        } else if file_type.is_symlink() {
            Some(RecordKind::Symlink)
        } else if file_type.is_char_device() {
            Some(RecordKind::Other(SpecialFile::CharDevice))
        } else if file_type.is_block_device() {
            Some(RecordKind::Other(SpecialFile::BlockDevice))
        } else if file_type.is_fifo() {
            Some(RecordKind::Other(SpecialFile::Fifo))
        } else {
            None
        }
    }

    /// Only regular files are followed by content bytes.
    pub fn carries_content(&self) -> bool {
        matches!(self, RecordKind::Regular)
    }
}

/// Everything a per-file archive header needs
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub kind: RecordKind,

    /// Declared content length; zero for everything but regular files
    pub size: u64,

    /// Permission and special mode bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub user_name: Option<String>,
    pub group_name: Option<String>,

    /// Modification time (seconds since Unix epoch)
    pub mtime: i64,

    pub link_target: Option<PathBuf>,

    /// (major, minor) for device nodes
    pub device: Option<(u64, u64)>,
}

impl FileRecord {
    /// Read the record for `path` without following symlinks.
    pub fn from_path(path: &Path, owners: &mut OwnerNames) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let kind = RecordKind::from_file_type(metadata.file_type()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "sockets not supported")
        })?;

        let link_target = match kind {
            RecordKind::Symlink => Some(fs::read_link(path)?),
            _ => None,
        };

        let device = match kind {
            RecordKind::Other(SpecialFile::CharDevice | SpecialFile::BlockDevice) => {
                let rdev = metadata.rdev();
                Some((nix::sys::stat::major(rdev), nix::sys::stat::minor(rdev)))
            }
            _ => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            size: if kind.carries_content() { metadata.len() } else { 0 },
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            user_name: owners.user(metadata.uid()),
            group_name: owners.group(metadata.gid()),
            mtime: metadata.mtime(),
            link_target,
            device,
        })
    }
}

/// Cached uid/gid to name resolution
#[derive(Debug, Default)]
pub struct OwnerNames {
    users: HashMap<u32, Option<String>>,
    groups: HashMap<u32, Option<String>>,
}

impl OwnerNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&mut self, uid: u32) -> Option<String> {
        self.users
            .entry(uid)
            .or_insert_with(|| {
                User::from_uid(Uid::from_raw(uid))
                    .ok()
                    .flatten()
                    .map(|u| u.name)
            })
            .clone()
    }

    pub fn group(&mut self, gid: u32) -> Option<String> {
        self.groups
            .entry(gid)
            .or_insert_with(|| {
                Group::from_gid(Gid::from_raw(gid))
                    .ok()
                    .flatten()
                    .map(|g| g.name)
            })
            .clone()
    }
}
