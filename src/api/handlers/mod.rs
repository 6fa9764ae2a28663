use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Catcher, Request, Route};
use serde_json::{Value, json};

pub mod config;
pub mod split;
pub mod task;
pub mod vr360;

pub fn generate_routes() -> Vec<Route> {
    routes![
        split::split,
        split::split_to_s3,
        split::split_url_to_s3,
        task::get_task,
        vr360::vr360,
        vr360::vr360_to_s3,
        vr360::get_vr360_config,
        config::save_player_config,
        config::get_player_config,
    ]
}

pub fn generate_catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

#[catch(default)]
fn default_catcher(status: Status, request: &Request<'_>) -> (Status, Json<Value>) {
    (
        status,
        Json(json!({
            "status": false,
            "data": null,
            "error": format!("{} {}: {}", request.method(), request.uri().path(), status),
        })),
    )
}

#[cfg(test)]
mod tests {
    use crate::api::{AppState, build_rocket};
    use crate::background::registry::JobRegistry;
    use crate::config::AppConfig;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn client(temp: &TempDir, storage: Option<Arc<dyn Storage>>) -> Client {
        let config = AppConfig {
            temp_path: temp.path().to_path_buf(),
            ..AppConfig::default()
        };
        let state = AppState {
            config: Arc::new(config),
            storage,
            registry: Arc::new(JobRegistry::new()),
        };
        Client::tracked(build_rocket(rocket::build(), state))
            .await
            .expect("valid rocket instance")
    }

    async fn body(response: rocket::local::asynchronous::LocalResponse<'_>) -> Value {
        let text = response.into_string().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let client = client(&temp, None).await;

        let response = client.get("/task?id=does-not-exist").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body = body(response).await;
        assert_eq!(body["status"], json!(false));
        assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
        let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["data", "error", "status"]);
    }

    #[tokio::test]
    async fn test_player_config_save_then_get() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let client = client(&temp, Some(storage)).await;
        let player = json!({
            "page": [{ "img": "https://cdn.test/spin/snapshot-1.png" }],
            "hotspot": [{
                "type": "text",
                "url": "",
                "text": "Engine bay",
                "coordinate": [{ "index": 0, "x": "10%", "y": "20%" }]
            }]
        });

        let response = client
            .post("/config?hash=demo")
            .header(ContentType::JSON)
            .body(player.to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let saved = body(response).await;
        assert_eq!(saved["status"], json!(true));
        assert!(saved["data"].as_str().unwrap().ends_with("/demo.json"));

        let response = client.get("/config?hash=demo").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(body(response).await["data"], player);
    }

    #[tokio::test]
    async fn test_player_config_rejects_bad_input() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let client = client(&temp, Some(storage)).await;

        let response = client
            .post("/config")
            .header(ContentType::JSON)
            .body("{ not json")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get("/config?hash=../secrets").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[tokio::test]
    async fn test_missing_vr360_config_is_404() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let client = client(&temp, Some(storage)).await;

        let response = client.get("/vr360/config?hash=nothing-here").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        assert_eq!(body(response).await["status"], json!(false));
    }

    #[tokio::test]
    async fn test_split_url_validation() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let client = client(&temp, Some(storage)).await;

        let response = client
            .post("/s3/url")
            .header(ContentType::Form)
            .body("url=https%3A%2F%2Fexample.com%2Fclip.mp4&splitSize=0")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert!(
            body(response).await["error"]
                .as_str()
                .unwrap()
                .contains("splitSize")
        );

        for oversized in ["361", "9223372036854775807", "-5"] {
            let response = client
                .post("/s3/url")
                .header(ContentType::Form)
                .body(format!(
                    "url=https%3A%2F%2Fexample.com%2Fclip.mp4&splitSize={}",
                    oversized
                ))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::BadRequest, "splitSize={}", oversized);
        }

        let response = client
            .post("/s3/url")
            .header(ContentType::Form)
            .body("url=ftp%3A%2F%2Fexample.com%2Fclip.mp4&splitSize=4")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        // Nothing may start, so no workspace is left behind either.
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_storage_routes_without_storage_fail() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let client = client(&temp, None).await;

        let response = client.get("/config?hash=demo").dispatch().await;
        assert_eq!(response.status(), Status::InternalServerError);
        assert!(
            body(response).await["error"]
                .as_str()
                .unwrap()
                .contains("not configured")
        );
    }

    #[tokio::test]
    async fn test_unmatched_route_uses_envelope() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let client = client(&temp, None).await;

        let response = client.get("/nowhere").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body = body(response).await;
        assert_eq!(body["status"], json!(false));
        assert_eq!(body["error"], json!("GET /nowhere: 404 Not Found"));
    }
}
