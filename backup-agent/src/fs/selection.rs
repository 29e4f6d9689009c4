//! Backup set resolution.
//!
//! Decides which filesystem entries belong in a backup from the configured
//! include/exclude rules and the live mount table:
//!
//! 1. every mount point gets a memoized verdict from its filesystem type and
//!    directory,
//! 2. absolute include rules are seeded as eligible roots,
//! 3. each eligible root is walked; every entry is added to the set and
//!    directories are descended into unless excluded.
//!
//! Mount verdicts are authoritative for their directory. Below mount level a
//! path is excluded when it matches an exclude rule and no include rule.

use crate::config::SelectionConfig;
use crate::fs::mounts::{self, MountEntry};
use crate::fs::rules::RuleSet;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// The selected paths, in path order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSet {
    paths: BTreeSet<PathBuf>,
}

impl BackupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.paths.insert(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

impl FromIterator<PathBuf> for BackupSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// Traversal state: rules, memoized directory verdicts and the growing set.
pub struct SelectionResolver {
    include: RuleSet,
    exclude: RuleSet,
    verdicts: BTreeMap<PathBuf, bool>,
    entered: HashSet<PathBuf>,
    set: BackupSet,
}

impl SelectionResolver {
    pub fn new(include: RuleSet, exclude: RuleSet) -> Self {
        Self {
            include,
            exclude,
            verdicts: BTreeMap::new(),
            entered: HashSet::new(),
            set: BackupSet::new(),
        }
    }

    pub fn from_config(selection: &SelectionConfig) -> Self {
        Self::new(
            RuleSet::new(&selection.include),
            RuleSet::new(&selection.exclude),
        )
    }

    /// Resolve against the configured mount table.
    pub fn resolve_config(selection: &SelectionConfig) -> BackupSet {
        let mounts = mounts::read_mount_table(&selection.mount_table);
        Self::from_config(selection).resolve(&mounts)
    }

    /// Run the whole resolution and hand back the finished set.
    pub fn resolve(mut self, mounts: &[MountEntry]) -> BackupSet {
        self.evaluate_mounts(mounts);
        self.seed_includes();

        let roots: Vec<PathBuf> = self
            .verdicts
            .iter()
            .filter(|(_, eligible)| **eligible)
            .map(|(dir, _)| dir.clone())
            .collect();

        for root in &roots {
            self.add_tree(root);
        }

        info!(
            "Backup set resolved: {} paths from {} roots",
            self.set.len(),
            roots.len()
        );
        self.set
    }

    /// Record a verdict for every mount point. Once a device has an eligible
    /// mount, its further mounts (bind mounts) are not evaluated.
    pub fn evaluate_mounts(&mut self, mounts: &[MountEntry]) {
        let mut devices = HashSet::new();

        for mount in mounts {
            if devices.contains(mount.device.as_str()) {
                continue;
            }
            if self.mount_eligible(mount) {
                devices.insert(mount.device.as_str());
            }
        }
    }

    /// Directory inclusion test for a mount; memoizes the verdict.
    fn mount_eligible(&mut self, mount: &MountEntry) -> bool {
        let fs_type = Path::new(mount.fs_type());
        let dir = mount.directory.as_path();

        let eligible = !(self.exclude.contains(fs_type) || self.exclude.contains(dir))
            && (self.include.contains(fs_type) || self.include.contains(dir));

        debug!(
            mount = %dir.display(),
            fs_type = mount.fs_type(),
            eligible,
            "Evaluated mount"
        );
        self.verdicts.insert(mount.directory.clone(), eligible);
        eligible
    }

    /// Absolute include rules are roots regardless of mount membership.
    pub fn seed_includes(&mut self) {
        let roots: Vec<PathBuf> = self.include.absolute_paths().map(Path::to_path_buf).collect();
        for root in roots {
            self.verdicts.insert(root, true);
        }
    }

    /// Memoized verdict for a directory, if one was recorded
    pub fn verdict(&self, dir: &Path) -> Option<bool> {
        self.verdicts.get(dir).copied()
    }

    /// Whether traversal must not descend into `path`.
    pub fn excluded(&self, path: &Path) -> bool {
        if let Some(eligible) = self.verdicts.get(path) {
            return !eligible;
        }
        self.exclude.contains(path) && !self.include.contains(path)
    }

    /// Add `root` and everything reachable below it. Unreadable directories
    /// contribute only themselves.
    fn add_tree(&mut self, root: &Path) {
        self.set.insert(root.to_path_buf());

        if !self.entered.insert(root.to_path_buf()) {
            return;
        }

        let mut walker = WalkDir::new(root).follow_links(false).min_depth(1).into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if is_ephemeral(&file_type) {
                continue;
            }

            let path = entry.path();
            self.set.insert(path.to_path_buf());

            if file_type.is_dir() && (self.excluded(path) || !self.entered.insert(path.to_path_buf())) {
                walker.skip_current_dir();
            }
        }
    }
}

/// Runtime-only entries that no archive record can represent.
fn is_ephemeral(file_type: &std::fs::FileType) -> bool {
    file_type.is_socket()
}
