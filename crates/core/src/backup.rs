//! End-to-end backup runs: find a destination volume, then try each
//! archival strategy in order until one produces the archive.

use crate::archive::{ArchiveStrategy, BackupRequest, Py7zrLibrary, SevenZipCli};
use crate::collector::ExtensionAllowlist;
use crate::volume::{default_locator, VolumeLocator};
use crate::DuffelError;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Final verdict of one run.
#[derive(Debug)]
pub enum BackupOutcome {
    /// A strategy produced the archive.
    Archived {
        strategy: &'static str,
        target: PathBuf,
    },
    /// Discovery found no destination; nothing was attempted.
    NoVolume,
    /// Every strategy failed, reasons in attempt order.
    Exhausted {
        failures: Vec<(&'static str, DuffelError)>,
    },
}

/// Drives one complete run: discovery, then the strategy chain, strictly
/// in sequence. A strategy's success ends the run; its failure hands the
/// same request to the next one.
pub struct BackupRunner {
    identity: String,
    allowlist: ExtensionAllowlist,
    locator: Box<dyn VolumeLocator>,
    strategies: Vec<Box<dyn ArchiveStrategy>>,
}

impl BackupRunner {
    /// Standard configuration: platform locator, external tool first,
    /// library fallback second.
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            locator: default_locator(&identity),
            strategies: vec![Box::new(SevenZipCli::new()), Box::new(Py7zrLibrary::new())],
            allowlist: ExtensionAllowlist::default(),
            identity,
        }
    }

    pub fn with_allowlist(mut self, allowlist: ExtensionAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_locator(mut self, locator: Box<dyn VolumeLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ArchiveStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Discover a removable volume and archive `source_root` onto it.
    pub fn execute(&self, source_root: &Path) -> BackupOutcome {
        info!("looking for a removable volume");
        let Some(volume) = self.locator.locate() else {
            warn!("no removable volume detected, backup aborted");
            return BackupOutcome::NoVolume;
        };
        info!("destination volume: {}", volume.mount_path.display());
        self.execute_to(&volume.mount_path, source_root)
    }

    /// Run the strategy chain against a known destination directory.
    pub fn execute_to(&self, destination_dir: &Path, source_root: &Path) -> BackupOutcome {
        let request = BackupRequest {
            source_root: source_root.to_path_buf(),
            destination_dir: destination_dir.to_path_buf(),
            identity: self.identity.clone(),
            allowlist: self.allowlist.clone(),
        };

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            info!("attempting archive via {}", strategy.name());
            match strategy.archive(&request) {
                Ok(target) => {
                    info!(
                        "backup complete via {}: {}",
                        strategy.name(),
                        target.display()
                    );
                    return BackupOutcome::Archived {
                        strategy: strategy.name(),
                        target,
                    };
                }
                Err(e) => {
                    error!("{} failed: {}", strategy.name(), e);
                    failures.push((strategy.name(), e));
                }
            }
        }

        error!("all archival strategies failed");
        BackupOutcome::Exhausted { failures }
    }
}
