//! Removable-volume discovery.
//!
//! Two interchangeable strategies sit behind [`VolumeLocator`]: drive
//! enumeration keyed on the removable-media flag, and probing of the
//! conventional per-user media roots for mounted children. Discovery runs
//! fresh on every backup; nothing is cached between runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A mount path believed to be removable or external media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovableVolume {
    pub mount_path: PathBuf,
}

impl RemovableVolume {
    pub fn new(mount_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_path: mount_path.into(),
        }
    }
}

/// Capability shared by the discovery strategies.
///
/// `None` is a normal outcome ("no destination available right now"),
/// not an error.
pub trait VolumeLocator {
    fn locate(&self) -> Option<RemovableVolume>;
}

/// Standard chain for the platform: drive enumeration where the system
/// exposes logical drives, media-root probing everywhere else.
pub fn default_locator(username: &str) -> Box<dyn VolumeLocator> {
    if cfg!(windows) {
        Box::new(DriveLetterLocator::new())
    } else {
        Box::new(MediaMountLocator::new(username))
    }
}

/// Scans the system disk list and keeps the first entry flagged as
/// removable media.
pub struct DriveLetterLocator;

impl DriveLetterLocator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DriveLetterLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeLocator for DriveLetterLocator {
    fn locate(&self) -> Option<RemovableVolume> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        for disk in disks.list() {
            debug!(
                "disk {:?} mounted at {} (removable: {})",
                disk.name(),
                disk.mount_point().display(),
                disk.is_removable()
            );
            if disk.is_removable() {
                return Some(RemovableVolume::new(disk.mount_point()));
            }
        }
        None
    }
}

/// Probes the per-user media roots in order and keeps the first child
/// directory that is itself a mount point.
pub struct MediaMountLocator {
    candidate_roots: Vec<PathBuf>,
}

impl MediaMountLocator {
    /// Conventional media roots for `username`, probed in order.
    pub fn new(username: &str) -> Self {
        Self {
            candidate_roots: vec![
                PathBuf::from(format!("/media/{username}")),
                PathBuf::from(format!("/run/media/{username}")),
                PathBuf::from(format!("/Volumes/{username}")),
            ],
        }
    }

    /// Replace the probed roots. Used by tests.
    pub fn with_roots(candidate_roots: Vec<PathBuf>) -> Self {
        Self { candidate_roots }
    }

    /// A child is a mount point when it sits on a different device than its
    /// parent root. Symlinks are never mount points.
    fn is_mount_point(child: &Path, root_device: u64) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            match child.symlink_metadata() {
                Ok(meta) if meta.file_type().is_symlink() => false,
                Ok(meta) if meta.is_dir() => meta.dev() != root_device,
                _ => false,
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (child, root_device);
            false
        }
    }

    fn device_of(root: &Path) -> Option<u64> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            root.metadata().ok().map(|meta| meta.dev())
        }
        #[cfg(not(unix))]
        {
            let _ = root;
            None
        }
    }
}

impl VolumeLocator for MediaMountLocator {
    fn locate(&self) -> Option<RemovableVolume> {
        for root in &self.candidate_roots {
            if !root.is_dir() {
                debug!("media root {} not present, skipping", root.display());
                continue;
            }
            let Some(root_device) = Self::device_of(root) else {
                continue;
            };
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("cannot list media root {}: {}", root.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if Self::is_mount_point(&path, root_device) {
                    debug!("found mounted volume at {}", path.display());
                    return Some(RemovableVolume::new(path));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_roots_yield_no_volume() {
        let temp = TempDir::new().unwrap();
        let locator =
            MediaMountLocator::with_roots(vec![temp.path().join("media").join("nobody")]);
        assert!(locator.locate().is_none());
    }

    #[test]
    fn plain_subdirectories_are_not_volumes() {
        // A subdirectory lives on the same device as its parent, so it must
        // not be mistaken for a mounted drive.
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("media");
        std::fs::create_dir_all(root.join("usb-stick")).unwrap();

        let locator = MediaMountLocator::with_roots(vec![root]);
        assert!(locator.locate().is_none());
    }

    #[test]
    fn files_under_a_media_root_are_ignored() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::write(root.join("stray.txt"), "not a mount").unwrap();

        let locator = MediaMountLocator::with_roots(vec![root]);
        assert!(locator.locate().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_children_are_never_volumes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("media");
        std::fs::create_dir_all(&root).unwrap();
        let elsewhere = temp.path().join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, root.join("link")).unwrap();

        let locator = MediaMountLocator::with_roots(vec![root]);
        assert!(locator.locate().is_none());
    }

    #[test]
    fn present_but_empty_roots_yield_no_volume() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("run-media");
        let second = temp.path().join("media");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();

        let locator = MediaMountLocator::with_roots(vec![first, second]);
        assert!(locator.locate().is_none());
    }
}
