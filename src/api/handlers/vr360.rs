use anyhow::{Context, Result};
use log::info;
use rocket::State;
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use std::path::PathBuf;

use crate::api::{AppError, AppResult, AppState, ServiceResult, ZipDownload, form_error, success};
use crate::background::flows;
use crate::background::jobs::spawn_job;
use crate::background::processors::pyramid::{
    PannellumConfig, UnrecognisedImage, materialize_source, validate_haov,
};
use crate::background::registry::Job;
use crate::background::workspace::Workspace;

const DEFAULT_HAOV: f64 = 360.0;

#[derive(FromForm, Debug)]
pub struct PanoramaForm<'r> {
    #[field(name = "image")]
    pub image: TempFile<'r>,

    /// Horizontal angle of view in degrees
    #[field(name = "haov")]
    pub haov: Option<f64>,
}

/// Validated angle plus the panorama copied into a fresh workspace.
async fn receive_panorama(
    state: &AppState,
    form: &PanoramaForm<'_>,
) -> AppResult<(Workspace, PathBuf, f64)> {
    let haov = form.haov.unwrap_or(DEFAULT_HAOV);
    validate_haov(haov).map_err(AppError::bad_request)?;

    let workspace = Workspace::acquire(&state.config.temp_path)?;
    let source = copy_image(&form.image, &workspace).await.map_err(|e| {
        if e.is::<UnrecognisedImage>() {
            AppError::bad_request(e)
        } else {
            AppError::from(e)
        }
    })?;
    info!("Received panorama {:?}, haov {}", source, haov);
    Ok((workspace, source, haov))
}

async fn copy_image(image: &TempFile<'_>, workspace: &Workspace) -> Result<PathBuf> {
    let reader = image
        .open()
        .await
        .context("failed to open uploaded panorama")?;
    materialize_source(Box::pin(reader), workspace.path()).await
}

#[post("/vr360", data = "<form>")]
pub async fn vr360(
    state: &State<AppState>,
    form: Result<Form<PanoramaForm<'_>>, Errors<'_>>,
) -> AppResult<ZipDownload> {
    let inner_form = form.map_err(form_error)?.into_inner();
    let (workspace, source, haov) = receive_panorama(state, &inner_form).await?;

    let stream = flows::pyramid_to_archive(&state.config, workspace, source, haov).await?;
    Ok(ZipDownload::timestamped(stream))
}

#[post("/vr360/s3", data = "<form>")]
pub async fn vr360_to_s3(
    state: &State<AppState>,
    form: Result<Form<PanoramaForm<'_>>, Errors<'_>>,
) -> AppResult<Json<ServiceResult<Job>>> {
    let inner_form = form.map_err(form_error)?.into_inner();
    let storage = state.storage()?;
    let (workspace, source, haov) = receive_panorama(state, &inner_form).await?;

    let config = state.config.clone();
    let job = spawn_job(state.registry.clone(), workspace, move |workspace| async move {
        flows::pyramid_to_storage(&config, storage, workspace, source, haov).await
    });
    Ok(success(job))
}

#[get("/vr360/config?<hash>")]
pub async fn get_vr360_config(
    state: &State<AppState>,
    hash: &str,
) -> AppResult<Json<ServiceResult<PannellumConfig>>> {
    flows::validate_hash(hash).map_err(AppError::bad_request)?;
    let storage = state.storage()?;

    let descriptor = flows::load_vr360_config(&state.config, storage.as_ref(), hash)
        .await
        .map_err(AppError::classify)?;
    Ok(success(descriptor))
}
