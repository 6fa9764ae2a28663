use anyhow::{Result, anyhow};
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::background::pool::{Concurrency, run_pool};
use crate::storage::Storage;
use crate::utils::{PathExt, join_key};

/// Outcome of one file upload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-file outcomes of [`upload_tree`], each list sorted by key.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<UploadResult>,
    /// Files that could not be uploaded, with `error` set
    pub failed: Vec<UploadResult>,
}

/// Uploads every regular file under `root` to `{prefix}/{relative path}`.
///
/// A failed upload does not stop the others; it is logged and reported in
/// [`UploadReport::failed`]. A directory walk error is returned once the uploads already
/// queued have finished.
pub async fn upload_tree(
    storage: Arc<dyn Storage>,
    root: &Path,
    prefix: &str,
    concurrency: Concurrency,
) -> Result<UploadReport> {
    let mut files: Vec<(PathBuf, String)> = Vec::new();
    let mut walk_error = None;
    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .map(|p| p.to_slash_string())
                    .unwrap_or_default();
                files.push((entry.path().to_path_buf(), join_key([prefix, relative.as_str()])));
            }
            Ok(_) => {}
            Err(e) => {
                walk_error = Some(anyhow!("failed to walk {:?}: {}", root, e));
                break;
            }
        }
    }

    let total = files.len();
    let drained = run_pool(files, concurrency, move |(path, key): (PathBuf, String)| {
        let storage = storage.clone();
        async move {
            let result = match storage.upload_file(&path, &key).await {
                Ok(stored) => UploadResult {
                    key: stored.key,
                    url: stored.url,
                    error: None,
                },
                Err(e) => {
                    let e = e.context(format!("failed to upload {:?} as {}", path, key));
                    error!("{:#}", e);
                    UploadResult {
                        url: storage.url(&key),
                        key,
                        error: Some(format!("{:#}", e)),
                    }
                }
            };
            Ok(result)
        }
    })
    .await;

    let (mut uploaded, mut failed): (Vec<_>, Vec<_>) = drained
        .succeeded
        .into_iter()
        .partition(|r: &UploadResult| r.error.is_none());
    uploaded.sort_by(|a, b| a.key.cmp(&b.key));
    failed.sort_by(|a, b| a.key.cmp(&b.key));

    info!("Uploaded {} of {} files under {}", uploaded.len(), total, prefix);
    if let Some(e) = walk_error {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(UploadReport { uploaded, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tree(files: &[&str]) -> TempDir {
        let dir = TempDir::new().expect("Failed to create temp dir");
        for file in files {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, file.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_keys_are_prefixed_relative_paths() {
        let dir = tree(&["1/f0_0.jpg", "2/b1_0.jpg", "fallback/u.jpg", "config.json"]);
        let storage = Arc::new(MemoryStorage::new());

        let report = upload_tree(storage.clone(), dir.path(), "vr360/abc", Concurrency::Bounded(2))
            .await
            .unwrap();
        assert!(report.failed.is_empty());
        let results = report.uploaded;

        let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "vr360/abc/1/f0_0.jpg",
                "vr360/abc/2/b1_0.jpg",
                "vr360/abc/config.json",
                "vr360/abc/fallback/u.jpg"
            ]
        );
        assert!(results.iter().all(|r| r.error.is_none()));
        assert_eq!(results[0].url, "https://cdn.test/vr360/abc/1/f0_0.jpg");
        assert_eq!(
            storage.content_type("vr360/abc/config.json").as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_bounded_upload_peak_and_partial_failure() {
        let names: Vec<String> = (0..10).map(|i| format!("{}/tile_{}.jpg", i % 3, i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = tree(&refs);
        let storage = Arc::new(
            MemoryStorage::new()
                .failing_on("tile_7")
                .with_delay(Duration::from_millis(10)),
        );

        let report = upload_tree(storage.clone(), dir.path(), "", Concurrency::Bounded(2))
            .await
            .unwrap();

        assert_eq!(report.uploaded.len(), 9);
        assert!(storage.peak() <= 2);
        assert!(!report.uploaded.iter().any(|r| r.key.contains("tile_7")));
        assert_eq!(storage.keys().len(), 9);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "1/tile_7.jpg");
        let error = report.failed[0].error.as_deref().unwrap();
        assert!(error.contains("503 Service Unavailable"));
        assert!(error.starts_with("failed to upload"));
    }

    #[tokio::test]
    async fn test_unbounded_upload_dispatches_everything() {
        let dir = tree(&["snapshot-1.png", "snapshot-2.png", "snapshot-3.png", "snapshot-4.png"]);
        let storage = Arc::new(MemoryStorage::new().with_delay(Duration::from_millis(50)));

        let report = upload_tree(storage.clone(), dir.path(), "spin", Concurrency::Unbounded)
            .await
            .unwrap();

        assert_eq!(report.uploaded.len(), 4);
        assert!(storage.peak() > 2);
    }

    #[tokio::test]
    async fn test_empty_tree() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(MemoryStorage::new());
        let report = upload_tree(storage, dir.path(), "p", Concurrency::Bounded(2))
            .await
            .unwrap();
        assert!(report.uploaded.is_empty() && report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(MemoryStorage::new());
        let missing = dir.path().join("gone");
        assert!(
            upload_tree(storage, &missing, "p", Concurrency::Bounded(2))
                .await
                .is_err()
        );
    }
}
