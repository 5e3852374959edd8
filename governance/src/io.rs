//! Crash-safe file replacement.
//!
//! Every write the engine makes (stamped source, mirror, pointer registry)
//! goes through [`write_atomic`]:
//!
//! 1. Write to a staging file in the target's directory
//! 2. fsync the staging file
//! 3. Rename over the target
//!
//! A failure at any step leaves the target untouched and removes the
//! staging file.

use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::error::{GovernanceError, Result};

/// Marker embedded in staging file names.
pub const STAGING_MARKER: &str = ".pipz-tmp-";

/// Whether `path` names a staging file left by [`write_atomic`].
pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().contains(STAGING_MARKER))
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    target.with_file_name(format!(".{name}{STAGING_MARKER}{suffix:06x}"))
}

/// Replace `target` with `bytes`, durably.
///
/// An existing target's permissions carry over to the replacement.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let staging = staging_path(target);
    let written = write_staging(&staging, target, bytes).await;
    let result = match written {
        Ok(()) => tokio::fs::rename(&staging, target)
            .await
            .map_err(|e| GovernanceError::FileWrite {
                path: target.to_path_buf(),
                source: e,
            }),
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&staging).await;
    }
    result
}

async fn write_staging(staging: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |e| GovernanceError::FileWrite {
        path: staging.to_path_buf(),
        source: e,
    };

    let mut file = tokio::fs::File::create(staging).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;

    if let Ok(meta) = tokio::fs::metadata(target).await {
        file.set_permissions(meta.permissions())
            .await
            .map_err(write_err)?;
    }
    Ok(())
}
