use anyhow::anyhow;
use log::{error, warn};
use rocket::form::Errors;
use rocket::http::{ContentType, Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{Build, Rocket};
use serde::Serialize;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;

use crate::background::processors::archive::ArchiveStream;
use crate::background::registry::{JobError, JobRegistry};
use crate::config::AppConfig;
use crate::storage::{ObjectNotFound, Storage};

pub mod handlers;

// ────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────

/// Everything the handlers share, managed by rocket.
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when no storage backend is configured; storage routes then fail.
    pub storage: Option<Arc<dyn Storage>>,
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn storage(&self) -> AppResult<Arc<dyn Storage>> {
        self.storage
            .clone()
            .ok_or_else(|| AppError::from(anyhow!("remote storage is not configured")))
    }
}

pub fn build_rocket(rocket: Rocket<Build>, state: AppState) -> Rocket<Build> {
    rocket
        .manage(state)
        .mount("/", handlers::generate_routes())
        .register("/", handlers::generate_catchers())
}

// ────────────────────────────────────────────────────────────────
// Envelopes
// ────────────────────────────────────────────────────────────────

/// Body of every JSON response: `{ status, data, error }`.
#[derive(Debug, Serialize)]
pub struct ServiceResult<T> {
    pub status: bool,
    pub data: T,
    pub error: String,
}

pub fn success<T: Serialize>(data: T) -> Json<ServiceResult<T>> {
    Json(ServiceResult {
        status: true,
        data,
        error: String::new(),
    })
}

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        Self {
            status: Status::BadRequest,
            error: error.into(),
        }
    }

    /// Picks the status from the error itself: unknown jobs and objects are 404.
    pub fn classify(error: anyhow::Error) -> Self {
        let not_found = error.chain().any(|cause| {
            cause.is::<ObjectNotFound>()
                || matches!(cause.downcast_ref::<JobError>(), Some(JobError::NotFound(_)))
        });
        Self {
            status: if not_found {
                Status::NotFound
            } else {
                Status::InternalServerError
            },
            error,
        }
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        if self.status.code >= 500 {
            error!("{:#}", self.error);
        } else {
            warn!("{:#}", self.error);
        }

        let body = json!({
            "status": false,
            "data": null,
            "error": format!("{:#}", self.error),
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: anyhow::Error::from(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Folds rocket form errors into one 400 error.
pub fn form_error(errors: Errors<'_>) -> AppError {
    let error_chain = errors
        .iter()
        .map(|e| anyhow!(e.to_string()))
        .reduce(|acc, e| acc.context(e.to_string()));

    match error_chain {
        Some(chain) => AppError::bad_request(chain.context("Failed to parse form")),
        None => AppError::bad_request(anyhow!("Failed to parse form with unknown error")),
    }
}

// ────────────────────────────────────────────────────────────────
// Zip download
// ────────────────────────────────────────────────────────────────

/// A streamed `application/zip` attachment.
pub struct ZipDownload {
    pub stream: ArchiveStream,
    pub file_name: String,
}

impl ZipDownload {
    /// Attachment named after the current local time, `YYYYMMDDhhmmss.zip`.
    pub fn timestamped(stream: ArchiveStream) -> Self {
        Self {
            stream,
            file_name: chrono::Local::now().format("%Y%m%d%H%M%S.zip").to_string(),
        }
    }
}

impl<'r> Responder<'r, 'static> for ZipDownload {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .header(ContentType::ZIP)
            .header(Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", self.file_name),
            ))
            .streamed_body(self.stream)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = anyhow::Error::from(JobError::NotFound("abc".to_string()));
        assert_eq!(AppError::classify(err).status, Status::NotFound);

        let err = anyhow::Error::from(ObjectNotFound("vr360/x.json".to_string()))
            .context("failed to load config");
        assert_eq!(AppError::classify(err).status, Status::NotFound);

        let err = anyhow!("nona: cannot open image");
        assert_eq!(AppError::classify(err).status, Status::InternalServerError);
    }
}
