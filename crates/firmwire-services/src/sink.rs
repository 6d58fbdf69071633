//! Persistence sinks: where verified firmware goes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Receives firmware that has passed the verification gate.
///
/// Called at most once per accepted transfer. The payload borrow ends when
/// `save` returns; a sink that needs the bytes later must copy them.
pub trait PersistenceSink {
    fn save(&mut self, destination: &Path, payload: &[u8]) -> Result<(), SinkError>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no destination given for firmware")]
    EmptyDestination,

    #[error("refusing to save empty firmware")]
    EmptyPayload,

    #[error("destination {0} does not name a file")]
    NotAFile(PathBuf),

    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

// ── File ─────────────────────────────────────────────────────────────────────

/// Writes firmware to the filesystem, replacing any previous image.
///
/// The image is staged in `<destination>.tmp` beside the target, synced,
/// then renamed over it, so `destination` holds either the old image or
/// the complete new one.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

impl FileSink {
    fn staging_path(destination: &Path) -> Result<PathBuf, SinkError> {
        let name = destination
            .file_name()
            .ok_or_else(|| SinkError::NotAFile(destination.to_path_buf()))?;
        let mut staged = name.to_os_string();
        staged.push(".tmp");
        Ok(destination.with_file_name(staged))
    }

    fn stage(staging: &Path, payload: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(staging)?;
        file.write_all(payload)?;
        file.sync_all()
    }
}

impl PersistenceSink for FileSink {
    fn save(&mut self, destination: &Path, payload: &[u8]) -> Result<(), SinkError> {
        if destination.as_os_str().is_empty() {
            return Err(SinkError::EmptyDestination);
        }
        if payload.is_empty() {
            return Err(SinkError::EmptyPayload);
        }

        let staging = Self::staging_path(destination)?;
        if let Err(e) = Self::stage(&staging, payload) {
            let _ = fs::remove_file(&staging);
            return Err(SinkError::Write(staging, e));
        }
        if let Err(e) = fs::rename(&staging, destination) {
            let _ = fs::remove_file(&staging);
            return Err(SinkError::Write(destination.to_path_buf(), e));
        }

        tracing::info!(
            path = %destination.display(),
            bytes = payload.len(),
            "firmware written"
        );
        Ok(())
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

/// Keeps every saved image in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    saved: Vec<(PathBuf, Vec<u8>)>,
    fail_with: Option<std::io::ErrorKind>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every save fails with `kind`.
    pub fn failing(kind: std::io::ErrorKind) -> Self {
        Self {
            saved: Vec::new(),
            fail_with: Some(kind),
        }
    }

    /// Every `(destination, payload)` saved so far, oldest first.
    pub fn saved(&self) -> &[(PathBuf, Vec<u8>)] {
        &self.saved
    }
}

impl PersistenceSink for MemorySink {
    fn save(&mut self, destination: &Path, payload: &[u8]) -> Result<(), SinkError> {
        if let Some(kind) = self.fail_with {
            return Err(SinkError::Write(
                destination.to_path_buf(),
                std::io::Error::from(kind),
            ));
        }
        self.saved.push((destination.to_path_buf(), payload.to_vec()));
        Ok(())
    }
}
