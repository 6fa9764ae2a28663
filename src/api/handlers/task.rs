use rocket::State;
use rocket::serde::json::Json;

use crate::api::{AppError, AppResult, AppState, ServiceResult, success};
use crate::background::registry::Job;

#[get("/task?<id>")]
pub async fn get_task(state: &State<AppState>, id: &str) -> AppResult<Json<ServiceResult<Job>>> {
    let job = state
        .registry
        .get(id)
        .map_err(|e| AppError::classify(e.into()))?;
    Ok(success(job))
}
