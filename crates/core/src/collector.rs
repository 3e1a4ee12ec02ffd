//! Extension-filtered collection of backup candidates.
//!
//! Both archival tiers share one selection rule: walk the source root,
//! keep regular files whose suffix is on the allowlist, and remember each
//! file's path relative to the root so directory structure survives inside
//! the archive.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Suffixes eligible for backup by default: documents, images, audio and
/// video, source code, archives, executables, and data formats.
const DEFAULT_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".txt", ".xls", ".xlsx", ".ppt", ".pptx", ".jpeg", ".jpg", ".png", ".py",
    ".pyw", ".cpp", ".epub", ".zip", ".7z", ".bat", ".wav", ".mp3", ".mp4", ".md", ".sh", ".exe",
    ".webp", ".log", ".yaml", ".hex", ".rb", ".c", ".cs", ".html", ".js", ".css", ".lua", ".csv",
    ".xml", ".rs", ".pyc", ".key", ".java", ".jar", ".ini", ".dll", ".enc", ".db", ".sql", ".o",
    ".out", ".stl", ".obj",
];

/// Immutable set of dotted, lowercase suffixes.
///
/// Matching is case-insensitive; only the final suffix of a file name is
/// considered, so `archive.tar.gz` is judged by `.gz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionAllowlist {
    suffixes: HashSet<String>,
}

impl ExtensionAllowlist {
    /// Build from dotted suffixes (`".pdf"`); entries are lowercased on the
    /// way in.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|suffix| suffix.into().to_lowercase())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// True when the path's final suffix is listed. Files without any
    /// suffix never match.
    pub fn matches(&self, path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => self.suffixes.contains(&format!(".{}", ext.to_lowercase())),
            None => false,
        }
    }
}

impl Default for ExtensionAllowlist {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied())
    }
}

/// A file selected for archival: where it lives on disk, and the
/// root-relative path it gets inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Walks a source tree and yields allowlisted files.
pub struct FileCollector {
    allowlist: ExtensionAllowlist,
}

impl FileCollector {
    pub fn new(allowlist: ExtensionAllowlist) -> Self {
        Self { allowlist }
    }

    /// Lazily walk `root`. Each call starts a fresh walk, so callers see
    /// the tree as it is right now. Symlinks are not followed and the walk
    /// stays on the root's filesystem, which keeps the selection inside
    /// the root; unreadable entries are logged and skipped rather than
    /// aborting the selection.
    pub fn collect<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = CandidateFile> + 'a {
        let allowlist = &self.allowlist;
        WalkDir::new(root)
            .follow_links(false)
            .same_file_system(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    None
                }
            })
            .filter_map(move |entry| {
                if !entry.file_type().is_file() {
                    return None;
                }
                if !allowlist.matches(entry.path()) {
                    return None;
                }
                let absolute = entry.into_path();
                let relative = absolute.strip_prefix(root).ok()?.to_path_buf();
                Some(CandidateFile { absolute, relative })
            })
    }
}
