use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::models::{ApiEnvelope, Professor, ProfessorInput, ProfessorRow, UploadedPhoto};
use crate::shape::{shape_aggregate, shape_professor};
use crate::store::PortalStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PortalStore>,
    pub config: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes * 2;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/all-data", get(all_data))
        .route("/api/professors", post(create_professor))
        .route(
            "/api/professors/{id}",
            get(get_professor)
                .put(update_professor)
                .delete(delete_professor),
        )
        .route(
            "/api/upload-photo",
            post(upload_photo).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/images/{file}", get(serve_image))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn all_data(State(state): State<AppState>) -> Response {
    match state.store.snapshot().await {
        Ok(snapshot) => Json(shape_aggregate(snapshot, Utc::now())).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "error fetching all data");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server Error").into_response()
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

fn parse_body(
    body: Result<Json<ProfessorInput>, JsonRejection>,
) -> Result<ProfessorInput, ApiError> {
    body.map(|Json(input)| input)
        .map_err(|_| ApiError::Validation("Invalid JSON body".to_string()))
}

fn professor_envelope(row: ProfessorRow) -> Json<ApiEnvelope<Professor>> {
    let (professor, warnings) = shape_professor(row);
    Json(ApiEnvelope::data(professor).with_warnings(warnings))
}

async fn get_professor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiEnvelope<Professor>>, ApiError> {
    let id = parse_id(&id)?;
    let row = state.store.professor(id).await?.ok_or(ApiError::NotFound)?;
    Ok(professor_envelope(row))
}

async fn create_professor(
    State(state): State<AppState>,
    body: Result<Json<ProfessorInput>, JsonRejection>,
) -> Result<Json<ApiEnvelope<Professor>>, ApiError> {
    let draft = parse_body(body)?.into_draft()?;
    let row = state.store.insert_professor(&draft).await?;
    Ok(professor_envelope(row))
}

async fn update_professor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ProfessorInput>, JsonRejection>,
) -> Result<Json<ApiEnvelope<Professor>>, ApiError> {
    let id = parse_id(&id)?;
    let draft = parse_body(body)?.into_draft()?;
    let row = state
        .store
        .update_professor(id, &draft)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(professor_envelope(row))
}

async fn delete_professor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiEnvelope<()>>, ApiError> {
    let id = parse_id(&id)?;
    if !state.store.delete_professor(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(ApiEnvelope::message("Professor deleted successfully")))
}

/// File extension for an accepted photo type. The client's filename is never
/// consulted, so a stored file can only be served as one of these types.
fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn content_type_for(file: &str) -> &'static str {
    let ext = FsPath::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiEnvelope<UploadedPhoto>>, ApiError> {
    let too_large = || {
        ApiError::Validation(format!(
            "File too large (max {})",
            state.config.max_upload_label()
        ))
    };

    let multipart_error = |err: MultipartError| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            tracing::debug!(error = %err, "rejected multipart body");
            ApiError::Validation("Invalid multipart body".to_string())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("photo") {
            continue;
        }

        let mimetype = field.content_type().unwrap_or_default().to_string();
        let Some(extension) = image_extension(&mimetype) else {
            return Err(ApiError::Validation("Only image files are allowed".to_string()));
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.len() > state.config.max_upload_bytes {
            return Err(too_large());
        }

        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let images_dir = &state.config.images_dir;
        let write = async {
            tokio::fs::create_dir_all(images_dir).await?;
            tokio::fs::write(images_dir.join(&filename), &bytes).await
        };
        write.await.map_err(ApiError::Storage)?;

        tracing::info!(%filename, size = bytes.len(), "photo uploaded");
        return Ok(Json(ApiEnvelope::data(UploadedPhoto {
            url: format!("/images/{filename}"),
            filename,
            size: bytes.len(),
            mimetype,
        })));
    }

    Err(ApiError::Validation("No file uploaded".to_string()))
}

async fn serve_image(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    let safe = !file.is_empty()
        && !file.starts_with('.')
        && file
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !safe {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(state.config.images_dir.join(&file)).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file))),
                (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn serve(config: ServerConfig, store: Arc<dyn PortalStore>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "faculty portal listening");

    let state = AppState {
        store,
        config: Arc::new(config),
    };
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawJson;
    use crate::store::memory::MemoryStore;
    use crate::store::Snapshot;
    use axum::body::{self, Body};
    use axum::http::Request;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn seeded_row(id: i64, nuptk: &str) -> ProfessorRow {
        ProfessorRow {
            id,
            name: "Dr. Sari Wulandari".to_string(),
            photo_url: None,
            nuptk: nuptk.to_string(),
            position: "Lektor Kepala".to_string(),
            start_date: NaiveDate::from_ymd_opt(2009, 3, 1),
            verified: true,
            faculty: Some("Fakultas Teknologi Informasi".to_string()),
            homebase: Some("Informatika".to_string()),
            academic_profile: RawJson::Text(r#"{"fieldOfScience":"CS"}"#.to_string()),
            rank: RawJson::Structured(json!({"title": "Lektor Kepala"})),
            certification: RawJson::Null,
            sinta_profile: RawJson::Null,
        }
    }

    fn app_with(store: Arc<MemoryStore>, images_dir: &FsPath) -> Router {
        router(AppState {
            store,
            config: Arc::new(ServerConfig::for_images(images_dir)),
        })
    }

    fn seeded_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_snapshot(Snapshot {
            professors: vec![seeded_row(1, "3341765666230123")],
            ..Snapshot::default()
        }))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn new_professor(nuptk: &str) -> Value {
        json!({
            "name": "Budi Santoso",
            "photo_url": "",
            "nuptk": nuptk,
            "position": "Lektor",
            "start_date": "2014-09-01",
            "verified": false,
            "faculty": "Fakultas Teknologi Informasi",
            "homebase": "Informatika",
            "academic_profile": {},
            "rank": {},
            "certification": {},
            "sinta_profile": null
        })
    }

    #[tokio::test]
    async fn all_data_shapes_store_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let (status, body) = send_json(app, empty_request("GET", "/api/all-data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["stats"],
            json!({"professors": {}, "students": {}, "graduation": {}, "applicants": {}})
        );
        let profile = &body["professors"]["profiles"][0];
        assert_eq!(profile["academicProfile"], json!({"fieldOfScience": "CS"}));
        assert_eq!(profile["startDate"], json!("2009-03-01"));
        assert!(profile.get("start_date").is_none());
        assert!(body["lastUpdated"].is_string());
        assert_eq!(body["lastUpdatedRecorded"], Value::Null);
    }

    #[tokio::test]
    async fn all_data_failure_hides_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        store.fail_snapshot.store(true, Ordering::SeqCst);
        let app = app_with(store, dir.path());

        let (status, body) = send(app, empty_request("GET", "/api/all-data")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, b"Server Error");
    }

    #[tokio::test]
    async fn get_professor_found_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let (status, body) = send_json(app.clone(), empty_request("GET", "/api/professors/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["rank"], json!({"title": "Lektor Kepala"}));

        let (status, body) = send_json(app.clone(), empty_request("GET", "/api/professors/42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"success": false, "error": "Professor not found"}));

        let (status, _) = send_json(app, empty_request("GET", "/api/professors/abc")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_assigns_id_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let app = app_with(store.clone(), dir.path());

        let (status, body) = send_json(
            app,
            json_request("POST", "/api/professors", new_professor("4455667788990011")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], json!(2));
        assert_eq!(body["data"]["photoUrl"], Value::Null);
        assert_eq!(body["data"]["academicProfile"], json!({}));
        assert_eq!(body["data"]["sintaProfile"], Value::Null);
        assert_eq!(store.professors().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_nuptk_is_rejected_without_insert() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let app = app_with(store.clone(), dir.path());

        let (status, body) = send_json(
            app,
            json_request("POST", "/api/professors", new_professor("3341765666230123")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "NUPTK already exists"}));
        assert_eq!(store.professors().len(), 1);
    }

    #[tokio::test]
    async fn missing_fields_and_bad_json_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let (status, body) = send_json(
            app.clone(),
            json_request("POST", "/api/professors", json!({"name": "Tanpa NUPTK"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            json!("Name, NUPTK, position, and start date are required")
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/professors")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send_json(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Invalid JSON body"));
    }

    #[tokio::test]
    async fn update_replaces_scalars_and_keeps_json_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let app = app_with(store.clone(), dir.path());

        let mut body = new_professor("3341765666230123");
        body["position"] = json!("Guru Besar");
        body["academic_profile"] = json!({"fieldOfScience": "ignored"});
        let (status, response) =
            send_json(app.clone(), json_request("PUT", "/api/professors/1", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["data"]["position"], json!("Guru Besar"));
        assert_eq!(response["data"]["academicProfile"], json!({"fieldOfScience": "CS"}));

        let (status, _) = send_json(
            app,
            json_request("PUT", "/api/professors/9", new_professor("1")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_existing_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let app = app_with(store.clone(), dir.path());

        let (status, body) = send_json(app.clone(), empty_request("DELETE", "/api/professors/7")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("Professor not found"));
        assert_eq!(store.professors().len(), 1);

        let (status, body) = send_json(app, empty_request("DELETE", "/api/professors/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"success": true, "message": "Professor deleted successfully"})
        );
        assert!(store.professors().is_empty());
    }

    const BOUNDARY: &str = "portal-test-boundary";

    fn multipart_request(content_type: &str, payload: &[u8]) -> Request<Body> {
        named_multipart_request("avatar.png", content_type, payload)
    }

    fn photo_part(filename: &str, content_type: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body
    }

    fn named_multipart_request(filename: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
        let mut body = photo_part(filename, content_type, payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        multipart_body(body)
    }

    fn multipart_body(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/upload-photo")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_stores_and_serves_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let payload = b"\x89PNG\r\n\x1a\nfake";
        let (status, body) = send_json(app.clone(), multipart_request("image/png", payload)).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["data"]["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/images/") && url.ends_with(".png"));
        assert_eq!(body["data"]["size"], json!(payload.len()));
        assert_eq!(body["data"]["mimetype"], json!("image/png"));

        let response = app.oneshot(empty_request("GET", &url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        let served = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&served[..], payload);
    }

    #[tokio::test]
    async fn upload_rejects_non_images_and_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let (status, body) = send_json(app.clone(), multipart_request("text/plain", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Only image files are allowed"));

        let oversized = vec![0u8; 5 * 1024 * 1024 + 1];
        let (status, body) = send_json(app, multipart_request("image/jpeg", &oversized)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("File too large (max 5MB)"));
    }

    #[tokio::test]
    async fn upload_extension_follows_content_type_not_filename() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let (status, body) = send_json(
            app.clone(),
            named_multipart_request("x.svg", "image/png", b"\x89PNG\r\n\x1a\n"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["url"].as_str().unwrap().ends_with(".png"));

        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg"><script>alert(1)</script></svg>"#;
        let (status, body) = send_json(app, named_multipart_request("x.svg", "image/svg+xml", svg)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Only image files are allowed"));

        let stored: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn svg_files_on_disk_are_not_served_as_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("legacy.svg"), "<svg/>").unwrap();
        let app = app_with(seeded_store(), dir.path());

        let response = app.oneshot(empty_request("GET", "/images/legacy.svg")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[tokio::test]
    async fn truncated_multipart_is_a_bad_body_not_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());

        let body = photo_part("avatar.png", "image/png", b"\x89PNG\r\n\x1a\npartial");
        let (status, body) = send_json(app, multipart_body(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Invalid multipart body"));
    }

    #[tokio::test]
    async fn image_route_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(seeded_store(), dir.path());
        let (status, _) = send(app, empty_request("GET", "/images/..%2Fsecret")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
