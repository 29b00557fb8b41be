//! Error types and shared plumbing for the knowledge base.
//! No app state or UI dependencies.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Parse error in {file}: {message}")]
    Parse { file: PathBuf, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Edit error: {0}")]
    Edit(#[from] crate::parser::edit::EditError),
    #[error("External tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),
    #[error("Project error: {0}")]
    Project(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

/// Problems with configured roots or user-supplied paths.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("no library roots configured for {0}")]
    NoRoots(&'static str),
    #[error("root does not exist: {0}")]
    MissingRoot(String),
    #[error("file does not exist: {0}")]
    MissingFile(String),
    #[error("not a snapshot name: {0}")]
    InvalidName(String),
}

/// Cooperative cancellation flag shared between the requester and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HubError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Recursively collect files with the given extension under `root`, in
/// file-name order. Hidden directories are skipped.
pub fn discover_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(false)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some(extension))
        .map(|e| e.into_path())
        .collect()
}

/// Check that every root exists before a scan starts.
pub fn check_roots(kind: &'static str, roots: &[PathBuf]) -> std::result::Result<(), PathError> {
    if roots.is_empty() {
        return Err(PathError::NoRoots(kind));
    }
    for root in roots {
        if !root.is_dir() {
            return Err(PathError::MissingRoot(root.display().to_string()));
        }
    }
    Ok(())
}

/// Sibling temp file used by [`write_atomic`].
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.tmp", name))
}

/// Write to a temp file in the same directory, flush it to disk, then rename
/// over `path`. Readers see either the old or the new contents.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
