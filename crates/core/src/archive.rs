//! Two-tier archival: the external `7z` binary first, the py7zr library
//! as fallback.
//!
//! Each tier is independently callable, computes the target path the same
//! way, and re-enumerates candidates itself, so whichever tier runs sees
//! the source tree as it is at that moment.

use crate::collector::{CandidateFile, ExtensionAllowlist, FileCollector};
use crate::installer::DependencyInstaller;
use crate::python::PythonRuntime;
use crate::{DuffelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Compression level handed to the external tool.
const COMPRESSION_LEVEL_FLAG: &str = "-mx=5";

/// The external archiver, tier 1's whole dependency.
const SEVENZIP_PROGRAM: &str = "7z";

/// The Python module tier 2 needs importable.
const SEVENZIP_MODULE: &str = "py7zr";

/// Helper program run under the interpreter by the library tier. Reads
/// `absolute<TAB>relative` lines on stdin and writes each file under its
/// relative name, so directory structure survives inside the archive.
const PY7ZR_WRITER: &str = r#"
import sys
import py7zr

target = sys.argv[1]
entries = [line.rstrip("\n").split("\t", 1) for line in sys.stdin if line.strip()]
with py7zr.SevenZipFile(target, "w") as archive:
    for absolute, relative in entries:
        archive.write(absolute, arcname=relative)
"#;

/// Everything a tier needs to attempt one archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRequest {
    pub source_root: PathBuf,
    pub destination_dir: PathBuf,
    pub identity: String,
    pub allowlist: ExtensionAllowlist,
}

impl BackupRequest {
    pub fn target_path(&self) -> PathBuf {
        archive_target(&self.destination_dir, &self.identity)
    }
}

/// `<destination>/<identity>Backup.7z`: the naming rule both tiers share.
/// The archive lands in the volume root, no subdirectories.
pub fn archive_target(destination_dir: &Path, identity: &str) -> PathBuf {
    destination_dir.join(format!("{identity}Backup.7z"))
}

/// One tier of the fallback chain.
///
/// Failure is an ordinary value for the chain to consume; a tier never
/// decides on its own whether another tier runs.
pub trait ArchiveStrategy {
    /// Name used in run reports and logs.
    fn name(&self) -> &'static str;

    /// Attempt the archive. `Ok` carries the written target path.
    fn archive(&self, request: &BackupRequest) -> Result<PathBuf>;
}

/// Tier 1: drive the external `7z` binary.
///
/// Success is judged by exit code alone; the produced archive is not
/// inspected afterwards.
pub struct SevenZipCli {
    program: String,
}

impl SevenZipCli {
    pub fn new() -> Self {
        Self {
            program: SEVENZIP_PROGRAM.to_string(),
        }
    }

    /// Substitute the archiver binary. Used by tests.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SevenZipCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStrategy for SevenZipCli {
    fn name(&self) -> &'static str {
        "7z-cli"
    }

    fn archive(&self, request: &BackupRequest) -> Result<PathBuf> {
        let target = request.target_path();
        info!(
            "compressing with `{}` to {}",
            self.program,
            target.display()
        );

        let collector = FileCollector::new(request.allowlist.clone());
        let candidates: Vec<CandidateFile> = collector.collect(&request.source_root).collect();
        if candidates.is_empty() {
            warn!(
                "nothing to archive under {}",
                request.source_root.display()
            );
            return Err(DuffelError::SelectionEmpty {
                root: request.source_root.clone(),
            });
        }
        info!("{} files selected", candidates.len());

        let mut command = Command::new(&self.program);
        command.arg("a").arg(&target);
        for candidate in &candidates {
            command.arg(&candidate.absolute);
        }
        command.arg(COMPRESSION_LEVEL_FLAG);

        let output = command.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DuffelError::ToolMissing {
                    program: self.program.clone(),
                }
            } else {
                DuffelError::Io(e)
            }
        })?;

        if output.status.success() {
            info!("external archiver finished");
            Ok(target)
        } else {
            Err(DuffelError::ToolFailed {
                program: self.program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Tier 2: write the archive with the py7zr library, installing it on
/// demand through [`DependencyInstaller`].
pub struct Py7zrLibrary {
    python: Option<PythonRuntime>,
    pip_program: Option<String>,
    bootstrap_url: Option<String>,
}

impl Py7zrLibrary {
    /// Discover the interpreter at archive time.
    pub fn new() -> Self {
        Self {
            python: None,
            pip_program: None,
            bootstrap_url: None,
        }
    }

    /// Pin the interpreter instead of discovering one. Used by tests.
    pub fn with_python(python: PythonRuntime) -> Self {
        Self {
            python: Some(python),
            pip_program: None,
            bootstrap_url: None,
        }
    }

    /// Forwarded to the installer. Used by tests.
    pub fn with_pip_program(mut self, program: impl Into<String>) -> Self {
        self.pip_program = Some(program.into());
        self
    }

    /// Forwarded to the installer. Used by tests.
    pub fn with_bootstrap_url(mut self, url: impl Into<String>) -> Self {
        self.bootstrap_url = Some(url.into());
        self
    }
}

impl Default for Py7zrLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStrategy for Py7zrLibrary {
    fn name(&self) -> &'static str {
        "py7zr"
    }

    fn archive(&self, request: &BackupRequest) -> Result<PathBuf> {
        let discovered;
        let python = match self.python.as_ref() {
            Some(python) => python,
            None => {
                discovered = PythonRuntime::discover()?;
                &discovered
            }
        };

        if !python.probe_import(SEVENZIP_MODULE) {
            let mut installer = DependencyInstaller::new(python);
            if let Some(program) = &self.pip_program {
                installer = installer.with_pip_program(program.as_str());
            }
            if let Some(url) = &self.bootstrap_url {
                installer = installer.with_bootstrap_url(url.as_str());
            }
            if !installer.ensure_available(SEVENZIP_MODULE).is_available() {
                return Err(DuffelError::LibraryUnavailable {
                    library: SEVENZIP_MODULE.to_string(),
                });
            }
        }

        let target = request.target_path();
        info!(
            "compressing with {} to {}",
            SEVENZIP_MODULE,
            target.display()
        );

        let collector = FileCollector::new(request.allowlist.clone());
        let mut listing = String::new();
        let mut selected = 0usize;
        for candidate in collector.collect(&request.source_root) {
            listing.push_str(&candidate.absolute.to_string_lossy());
            listing.push('\t');
            listing.push_str(&candidate.relative.to_string_lossy());
            listing.push('\n');
            selected += 1;
        }
        if selected == 0 {
            warn!(
                "nothing to archive under {}",
                request.source_root.display()
            );
            return Err(DuffelError::SelectionEmpty {
                root: request.source_root.clone(),
            });
        }
        info!("{selected} files selected");

        let target_arg = target.to_string_lossy();
        let output = python
            .run_code_with_stdin(PY7ZR_WRITER, &[target_arg.as_ref()], listing.as_bytes())
            .map_err(DuffelError::Io)?;

        if output.status.success() {
            info!("library archiver finished");
            Ok(target)
        } else {
            Err(DuffelError::LibraryFailed {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
