use rocket::State;
use rocket::serde::json::{self, Json};

use crate::api::{AppError, AppResult, AppState, ServiceResult, success};
use crate::background::flows;
use crate::models::Spin360Config;

/// Stores a spin-360 player config and returns its public URL.
#[post("/config?<hash>", data = "<player>")]
pub async fn save_player_config(
    state: &State<AppState>,
    hash: Option<String>,
    player: Result<Json<Spin360Config>, json::Error<'_>>,
) -> AppResult<Json<ServiceResult<String>>> {
    let player = player
        .map_err(|e| AppError::bad_request(anyhow::anyhow!("invalid player config: {}", e)))?
        .into_inner();
    if let Some(hash) = &hash {
        flows::validate_hash(hash).map_err(AppError::bad_request)?;
    }
    let storage = state.storage()?;

    let url = flows::save_player_config(&state.config, storage.as_ref(), hash, &player).await?;
    Ok(success(url))
}

#[get("/config?<hash>")]
pub async fn get_player_config(
    state: &State<AppState>,
    hash: &str,
) -> AppResult<Json<ServiceResult<Spin360Config>>> {
    flows::validate_hash(hash).map_err(AppError::bad_request)?;
    let storage = state.storage()?;

    let player = flows::load_player_config(&state.config, storage.as_ref(), hash)
        .await
        .map_err(AppError::classify)?;
    Ok(success(player))
}
