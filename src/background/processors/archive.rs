//! Zip archives of a workspace, streamed back to the client.
//!
//! The archive is written next to the workspace so it outlives it. A detached task
//! deletes it once the response body is dropped or [`ARCHIVE_DEADLINE`] passes,
//! whichever comes first; after the deadline every read fails with `TimedOut`.
//!
//! [`ARCHIVE_DEADLINE`]: crate::common::ARCHIVE_DEADLINE

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::utils::PathExt;

/// Writes every regular file under `src` into a zip at `dest`, keyed by its path
/// relative to `src`. Returns the number of entries.
pub fn zip_dir(src: &Path, dest: &Path) -> Result<usize> {
    let file = File::create(dest).context(format!("failed to create archive {:?}", dest))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.context(format!("failed to walk {:?}", src))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(src)?.to_slash_string();
        zip.start_file(relative.as_str(), options)
            .context(format!("failed to add {} to archive", relative))?;
        let mut input = File::open(entry.path())
            .context(format!("failed to open {:?}", entry.path()))?;
        std::io::copy(&mut input, &mut zip)
            .context(format!("failed to copy {:?} into archive", entry.path()))?;
        entries += 1;
    }

    let mut writer = zip.finish().context("failed to finalize archive")?;
    writer.flush()?;
    debug!("Archived {} files from {:?} into {:?}", entries, src, dest);
    Ok(entries)
}

/// A temporary archive being streamed. Dropping it schedules deletion of the file.
#[derive(Debug)]
pub struct ArchiveStream {
    file: tokio::fs::File,
    expired: Arc<AtomicBool>,
    _release: oneshot::Sender<()>,
}

impl ArchiveStream {
    /// Opens `path` for streaming and starts its cleanup task.
    pub async fn open(path: PathBuf, deadline: Duration) -> Result<Self> {
        let file = tokio::fs::File::open(&path)
            .await
            .context(format!("failed to open archive {:?}", path))?;
        let expired = Arc::new(AtomicBool::new(false));
        let (release, released) = oneshot::channel::<()>();

        let flag = expired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = released => debug!("Archive {:?} released by reader", path),
                _ = tokio::time::sleep(deadline) => {
                    info!("Archive {:?} reached its deadline", path);
                }
            }
            flag.store(true, Ordering::Release);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Failed to remove archive {:?}: {}", path, e),
            }
        });

        Ok(Self {
            file,
            expired,
            _release: release,
        })
    }
}

impl AsyncRead for ArchiveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.expired.load(Ordering::Acquire) {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "archive download deadline passed",
            )));
        }
        Pin::new(&mut this.file).poll_read(cx, buf)
    }
}
