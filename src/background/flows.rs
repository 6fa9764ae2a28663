//! End-to-end pipelines behind the HTTP routes.
//!
//! Each flow takes ownership of the request's [`Workspace`]: the derivation fills it,
//! then it is either archived and streamed back or uploaded to remote storage.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::background::processors::archive::{ArchiveStream, zip_dir};
use crate::background::processors::pyramid::{PannellumConfig, build_pyramid};
use crate::background::processors::sampler::{Sample, sample_frames};
use crate::background::uploader::upload_tree;
use crate::background::workspace::Workspace;
use crate::common::{
    ARCHIVE_DEADLINE, DOWNLOAD_TIMEOUT, FRAME_UPLOAD_CONCURRENCY, PANORAMA_UPLOAD_CONCURRENCY,
};
use crate::config::AppConfig;
use crate::models::Spin360Config;
use crate::storage::Storage;
use crate::utils::{PathExt, join_key};

const FRAMES_DIR: &str = "snap";
const PYRAMID_DIR: &str = "pano";
const CONFIG_FILE: &str = "config.json";

// ────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────

async fn sample_into_workspace(
    config: &AppConfig,
    workspace: &Workspace,
    video: &Path,
    count: usize,
) -> Result<Vec<Sample>> {
    if count > config.max_split_size {
        bail!(
            "cannot sample {} frames, the limit is {}",
            count,
            config.max_split_size
        );
    }
    sample_frames(
        &config.ffmpeg,
        config.max_video_height,
        video,
        count,
        &workspace.join(FRAMES_DIR),
    )
    .await
}

/// Samples `count` frames and returns them as a streamed zip.
pub async fn split_to_archive(
    config: &AppConfig,
    workspace: Workspace,
    video: PathBuf,
    count: usize,
) -> Result<ArchiveStream> {
    sample_into_workspace(config, &workspace, &video, count).await?;
    archive_workspace_dir(workspace, FRAMES_DIR).await
}

/// Samples `count` frames, uploads them under `{prefix}/{workspace id}` and returns the
/// public URLs in frame order.
pub async fn split_to_storage(
    config: &AppConfig,
    storage: Arc<dyn Storage>,
    workspace: Workspace,
    video: PathBuf,
    count: usize,
) -> Result<Value> {
    let frames = sample_into_workspace(config, &workspace, &video, count).await?;

    let prefix = join_key([config.default_prefix(), workspace.id()]);
    let report = upload_tree(
        storage,
        &workspace.join(FRAMES_DIR),
        &prefix,
        FRAME_UPLOAD_CONCURRENCY,
    )
    .await?;

    let mut urls_by_key: HashMap<String, String> =
        report.uploaded.into_iter().map(|r| (r.key, r.url)).collect();
    let urls: Vec<String> = frames
        .iter()
        .filter_map(|frame| {
            let name = frame.path.file_name()?.to_string_lossy().into_owned();
            urls_by_key.remove(&join_key([prefix.as_str(), name.as_str()]))
        })
        .collect();
    Ok(json!(urls))
}

/// Fetches `url` into the workspace, then runs [`split_to_storage`].
pub async fn split_from_url(
    config: &AppConfig,
    storage: Arc<dyn Storage>,
    workspace: Workspace,
    url: String,
    count: usize,
) -> Result<Value> {
    let video = download(&url, workspace.path()).await?;
    split_to_storage(config, storage, workspace, video, count).await
}

/// Streams the body of `url` to `{dir}/source.{ext}`.
pub async fn download(url: &str, dir: &Path) -> Result<PathBuf> {
    info!("Downloading {}", url);
    let parsed = reqwest::Url::parse(url).context(format!("invalid url {:?}", url))?;
    let ext = match Path::new(parsed.path()).ext_lower() {
        ext if ext.is_empty() => "mp4".to_string(),
        ext => ext,
    };
    let path = dir.join(format!("source.{}", ext));

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build download client")?;
    let mut response = client
        .get(parsed)
        .send()
        .await
        .context(format!("failed to download {}", url))?
        .error_for_status()
        .context(format!("failed to download {}", url))?;

    let file = tokio::fs::File::create(&path)
        .await
        .context(format!("failed to create {:?}", path))?;
    let mut writer = tokio::io::BufWriter::new(file);
    while let Some(chunk) = response
        .chunk()
        .await
        .context(format!("download of {} interrupted", url))?
    {
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    Ok(path)
}

// ────────────────────────────────────────────────────────────────
// Panoramas
// ────────────────────────────────────────────────────────────────

/// Builds the pyramid plus `config.json` and returns them as a streamed zip.
pub async fn pyramid_to_archive(
    config: &AppConfig,
    workspace: Workspace,
    source: PathBuf,
    haov: f64,
) -> Result<ArchiveStream> {
    let out = workspace.join(PYRAMID_DIR);
    tokio::fs::create_dir_all(&out)
        .await
        .context(format!("failed to create {:?}", out))?;

    let descriptor = build_pyramid(&config.nona, &out, &source, haov).await?;
    let json = serde_json::to_vec(&descriptor)?;
    tokio::fs::write(out.join(CONFIG_FILE), json)
        .await
        .context("failed to write config.json")?;

    archive_workspace_dir(workspace, PYRAMID_DIR).await
}

/// Builds the pyramid, uploads it under `{vr360_prefix}/{hash}` and stores the
/// descriptor as `{vr360_prefix}/{hash}.json`. Returns the descriptor URL.
pub async fn pyramid_to_storage(
    config: &AppConfig,
    storage: Arc<dyn Storage>,
    workspace: Workspace,
    source: PathBuf,
    haov: f64,
) -> Result<Value> {
    let out = workspace.join(PYRAMID_DIR);
    tokio::fs::create_dir_all(&out)
        .await
        .context(format!("failed to create {:?}", out))?;

    let descriptor = build_pyramid(&config.nona, &out, &source, haov).await?;

    let hash = workspace.id().to_string();
    let root = join_key([config.vr360_prefix(), hash.as_str()]);
    upload_tree(storage.clone(), &out, &root, PANORAMA_UPLOAD_CONCURRENCY).await?;

    let descriptor = descriptor.with_base_path(storage.url(&root));
    let key = join_key([config.vr360_prefix(), format!("{}.json", hash).as_str()]);
    let stored = storage
        .put(&key, serde_json::to_vec(&descriptor)?, "application/json")
        .await
        .context(format!("failed to store {}", key))?;
    Ok(json!(stored.url))
}

async fn archive_workspace_dir(workspace: Workspace, dir: &str) -> Result<ArchiveStream> {
    let src = workspace.join(dir);
    let dest = workspace.sibling_with_extension("zip");

    let zip_path = dest.clone();
    let zipped = tokio::task::spawn_blocking(move || zip_dir(&src, &zip_path))
        .await
        .context("archive task aborted")
        .and_then(|zipped| zipped);
    drop(workspace);
    if let Err(e) = zipped {
        if let Err(remove) = tokio::fs::remove_file(&dest).await {
            debug!("No partial archive to remove at {:?}: {}", dest, remove);
        }
        return Err(e);
    }

    ArchiveStream::open(dest, ARCHIVE_DEADLINE).await
}

// ────────────────────────────────────────────────────────────────
// Stored configs
// ────────────────────────────────────────────────────────────────

/// Hashes name stored objects, so they are limited to `[A-Za-z0-9_-]`.
pub fn validate_hash(hash: &str) -> Result<()> {
    if hash.is_empty()
        || hash.len() > 128
        || !hash
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("invalid hash {:?}", hash);
    }
    Ok(())
}

/// Stores a player config as `{prefix}/{hash}.json`, minting a hash when none is given.
pub async fn save_player_config(
    config: &AppConfig,
    storage: &dyn Storage,
    hash: Option<String>,
    player: &Spin360Config,
) -> Result<String> {
    let hash = match hash {
        Some(hash) => {
            validate_hash(&hash)?;
            hash
        }
        None => Uuid::new_v4().to_string(),
    };
    let key = join_key([config.default_prefix(), format!("{}.json", hash).as_str()]);
    let stored = storage
        .put(&key, serde_json::to_vec(player)?, "application/json")
        .await
        .context(format!("failed to store {}", key))?;
    Ok(stored.url)
}

pub async fn load_player_config(
    config: &AppConfig,
    storage: &dyn Storage,
    hash: &str,
) -> Result<Spin360Config> {
    validate_hash(hash)?;
    let key = join_key([config.default_prefix(), format!("{}.json", hash).as_str()]);
    let body = storage.get(&key).await?;
    serde_json::from_slice(&body).context(format!("stored config {} is malformed", key))
}

pub async fn load_vr360_config(
    config: &AppConfig,
    storage: &dyn Storage,
    hash: &str,
) -> Result<PannellumConfig> {
    validate_hash(hash)?;
    let key = join_key([config.vr360_prefix(), format!("{}.json", hash).as_str()]);
    let body = storage.get(&key).await?;
    serde_json::from_slice(&body).context(format!("stored config {} is malformed", key))
}
