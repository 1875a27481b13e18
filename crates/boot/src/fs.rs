//! Filesystem helpers for deployment artifacts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::error::{BootError, Result};

/// Create a directory (and parents) if it does not exist.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).map_err(|e| BootError::io(path, e))?;
    Ok(())
}

/// Wait for a file to appear, with a deadline.
///
/// Uses a filesystem watcher on the parent directory instead of polling, so
/// the file is seen as soon as the external toolchain writes it.
pub async fn wait_for_file(path: &PathBuf, deadline: Duration) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "Artifact already present");
        return Ok(());
    }

    tracing::info!(path = %path.display(), "Waiting for artifact...");

    let parent = path.parent().ok_or_else(|| {
        BootError::io(
            path,
            std::io::Error::other("artifact path has no parent directory"),
        )
    })?;

    let (tx, mut rx) = watch::channel(());
    let watched = path.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event)
                if (event.kind.is_create() || event.kind.is_modify())
                    && event.paths.contains(&watched) =>
            {
                tx.send(()).ok();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(path = %watched.display(), error = %e, "Watcher error");
            }
        }
    })
    .map_err(|e| BootError::io(path, std::io::Error::other(e)))?;

    watcher
        .watch(parent, RecursiveMode::NonRecursive)
        .map_err(|e| BootError::io(parent, std::io::Error::other(e)))?;

    // Re-check after arming the watcher: the file may have appeared between
    // the existence check and the watch call.
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }

    tokio::time::timeout(deadline, rx.changed())
        .await
        .map_err(|_| {
            BootError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("artifact did not appear within {deadline:?}"),
                ),
            )
        })?
        .map_err(|_| BootError::io(path, std::io::Error::other("watcher channel closed")))?;

    // The watcher can fire on creation before the writer finishes; give the
    // content a moment to be flushed.
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
