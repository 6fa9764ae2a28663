use anyhow::{Context, Result, anyhow};
use log::info;
use rocket::State;
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use std::path::PathBuf;

use crate::api::{AppError, AppResult, AppState, ServiceResult, ZipDownload, form_error, success};
use crate::background::flows;
use crate::background::jobs::spawn_job;
use crate::background::registry::Job;
use crate::background::workspace::Workspace;

#[derive(FromForm, Debug)]
pub struct SplitForm<'r> {
    #[field(name = "video")]
    pub video: TempFile<'r>,

    /// Number of frames to sample
    #[field(name = "splitSize")]
    pub split_size: i64,
}

#[derive(FromForm, Debug)]
pub struct SplitUrlForm {
    #[field(name = "url")]
    pub url: String,

    #[field(name = "splitSize")]
    pub split_size: i64,
}

/// `splitSize` must lie in `1..=max`.
fn frame_count(split_size: i64, max: usize) -> AppResult<usize> {
    match usize::try_from(split_size) {
        Ok(count) if (1..=max).contains(&count) => Ok(count),
        _ => Err(AppError::bad_request(anyhow!(
            "splitSize must be between 1 and {}, got {}",
            max,
            split_size
        ))),
    }
}

fn video_extension(file: &TempFile<'_>) -> String {
    file.content_type()
        .and_then(|ct| ct.extension())
        .map(|ext| ext.as_str().to_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}

/// Moves the uploaded video into a fresh workspace as `source.{ext}`.
async fn receive_video(
    state: &AppState,
    video: &mut TempFile<'_>,
) -> Result<(Workspace, PathBuf)> {
    let workspace = Workspace::acquire(&state.config.temp_path)?;
    let path = workspace.join(format!("source.{}", video_extension(video)));
    video
        .move_copy_to(&path)
        .await
        .context(format!("failed to persist uploaded video to {:?}", path))?;
    info!("Received video {:?}", path);
    Ok((workspace, path))
}

#[post("/split", data = "<form>")]
pub async fn split(
    state: &State<AppState>,
    form: Result<Form<SplitForm<'_>>, Errors<'_>>,
) -> AppResult<ZipDownload> {
    let mut inner_form = form.map_err(form_error)?.into_inner();
    let count = frame_count(inner_form.split_size, state.config.max_split_size)?;

    let (workspace, video) = receive_video(state, &mut inner_form.video).await?;
    let stream = flows::split_to_archive(&state.config, workspace, video, count).await?;
    Ok(ZipDownload::timestamped(stream))
}

#[post("/s3", data = "<form>")]
pub async fn split_to_s3(
    state: &State<AppState>,
    form: Result<Form<SplitForm<'_>>, Errors<'_>>,
) -> AppResult<Json<ServiceResult<Job>>> {
    let mut inner_form = form.map_err(form_error)?.into_inner();
    let count = frame_count(inner_form.split_size, state.config.max_split_size)?;
    let storage = state.storage()?;

    let (workspace, video) = receive_video(state, &mut inner_form.video).await?;
    let config = state.config.clone();
    let job = spawn_job(state.registry.clone(), workspace, move |workspace| async move {
        flows::split_to_storage(&config, storage, workspace, video, count).await
    });
    Ok(success(job))
}

#[post("/s3/url", data = "<form>")]
pub async fn split_url_to_s3(
    state: &State<AppState>,
    form: Result<Form<SplitUrlForm>, Errors<'_>>,
) -> AppResult<Json<ServiceResult<Job>>> {
    let inner_form = form.map_err(form_error)?.into_inner();
    let count = frame_count(inner_form.split_size, state.config.max_split_size)?;
    match reqwest::Url::parse(&inner_form.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return Err(AppError::bad_request(anyhow!(
                "invalid video url {:?}",
                inner_form.url
            )));
        }
    }
    let storage = state.storage()?;

    let workspace = Workspace::acquire(&state.config.temp_path)?;
    let config = state.config.clone();
    let url = inner_form.url;
    let job = spawn_job(state.registry.clone(), workspace, move |workspace| async move {
        flows::split_from_url(&config, storage, workspace, url, count).await
    });
    Ok(success(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    #[test]
    fn test_frame_count_bounds() {
        assert_eq!(frame_count(1, 360).unwrap(), 1);
        assert_eq!(frame_count(360, 360).unwrap(), 360);
        for rejected in [0, -1, 361, i64::MAX] {
            assert_eq!(frame_count(rejected, 360).unwrap_err().status, Status::BadRequest);
        }
    }
}
