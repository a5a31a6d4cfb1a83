//! Existence checks for model artifacts written by the worker

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Checks whether a model artifact is present
#[async_trait]
pub trait ArtifactProbe: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the local filesystem
///
/// Only a definite "not found" reports the artifact missing. Other I/O
/// failures (permissions, stale mounts) are logged and treated as present
/// so a transient error does not trigger a rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactProbe;

#[async_trait]
impl ArtifactProbe for FsArtifactProbe {
    async fn exists(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not check model artifact, assuming present"
                );
                true
            }
        }
    }
}
