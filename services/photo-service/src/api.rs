use crate::config::ApiConfig;
use crate::error::AppError;
use crate::image_generator::ImageGenerator;
use crate::photo_store::{PhotoRepository, MAX_URL_LEN};
use crate::storage_probe::StorageProbe;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub photo_store: Arc<dyn PhotoRepository>,
    pub image_generator: Arc<dyn ImageGenerator>,
    pub storage_probe: Arc<dyn StorageProbe>,
}

/// Body of `POST /generate-image`
#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    /// Text prompt
    pub content: String,
    /// When present, the generated image is recorded alongside this URL
    #[serde(default)]
    pub original_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<i32>,
}

/// Single photo pair as returned by `GET /photos/:id`
#[derive(Debug, Serialize)]
pub struct PhotoResponse {
    pub original_photo: String,
    pub dalle_photo: String,
}

#[derive(Debug, Serialize)]
pub struct BucketListResponse {
    pub buckets: Vec<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/test-s3", get(test_s3))
        .route("/generate-image", post(generate_image))
        .route("/photos/original", get(list_original_photos))
        .route("/photos/dalle", get(list_dalle_photos))
        .route("/photos/:id", get(get_photo))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Photo service is running" }))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.photo_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List buckets to verify object storage credentials
async fn test_s3(State(state): State<AppState>) -> Result<Json<BucketListResponse>, AppError> {
    let buckets = state.storage_probe.list_buckets().await?;
    Ok(Json(BucketListResponse { buckets }))
}

/// Generate an image, recording the pair when an original URL is supplied
#[instrument(skip(state, payload))]
async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, AppError> {
    let Json(request) = payload?;

    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".to_string()));
    }
    if let Some(ref original_url) = request.original_url {
        validate_url("original_url", original_url)?;
    }

    let image_url = state.image_generator.generate(&request.content).await?;

    // Only a successful generation produces a row
    let photo_id = match request.original_url {
        Some(ref original_url) => {
            let record = state.photo_store.create(original_url, &image_url).await?;
            info!(photo_id = record.id, "Generated photo recorded");
            Some(record.id)
        }
        None => None,
    };

    Ok(Json(GenerateImageResponse {
        image_url,
        photo_id,
    }))
}

async fn list_original_photos(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.photo_store.list_original().await?))
}

async fn list_dalle_photos(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.photo_store.list_dalle().await?))
}

#[instrument(skip(state, id))]
async fn get_photo(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PhotoResponse>, AppError> {
    let Path(id) = id?;
    // Ids past the serial column's range can never match a row
    let id = i32::try_from(id)
        .map_err(|_| AppError::NotFound(format!("Photo {id} not found")))?;
    let record = state.photo_store.get(id).await?;

    Ok(Json(PhotoResponse {
        original_photo: record.original_url,
        dalle_photo: record.dalle_url,
    }))
}

fn validate_url(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_URL_LEN {
        return Err(AppError::Validation(format!(
            "{field} must be at most {MAX_URL_LEN} characters"
        )));
    }
    Ok(())
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_generator::{GenerationError, MockImageGenerator};
    use crate::photo_store::{MockPhotoRepository, PhotoRecord, StoreError};
    use crate::storage_probe::{MockStorageProbe, ProbeError};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use chrono::{FixedOffset, Utc};
    use mockall::predicate::eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(
        store: MockPhotoRepository,
        generator: MockImageGenerator,
        probe: MockStorageProbe,
    ) -> Router {
        let state = AppState {
            photo_store: Arc::new(store),
            image_generator: Arc::new(generator),
            storage_probe: Arc::new(probe),
        };
        create_router(state, &ApiConfig::default())
    }

    fn record(id: i32, original_url: &str, dalle_url: &str) -> PhotoRecord {
        PhotoRecord {
            id,
            original_url: original_url.to_string(),
            dalle_url: dalle_url.to_string(),
            created_at: Utc::now().with_timezone(&FixedOffset::east_opt(9 * 3600).unwrap()),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_liveness() {
        let app = router(
            MockPhotoRepository::new(),
            MockImageGenerator::new(),
            MockStorageProbe::new(),
        );

        let (status, body) = send(app, get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_get_photo_returns_pair() {
        let mut store = MockPhotoRepository::new();
        store
            .expect_get()
            .with(eq(1))
            .times(1)
            .returning(|id| Ok(record(id, "https://a/1.jpg", "https://a/2.jpg")));

        let app = router(store, MockImageGenerator::new(), MockStorageProbe::new());
        let (status, body) = send(app, get("/photos/1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "original_photo": "https://a/1.jpg",
                "dalle_photo": "https://a/2.jpg"
            })
        );
    }

    #[tokio::test]
    async fn test_missing_photo_is_404() {
        let mut store = MockPhotoRepository::new();
        store
            .expect_get()
            .with(eq(999))
            .returning(|id| Err(StoreError::NotFound(id)));

        let app = router(store, MockImageGenerator::new(), MockStorageProbe::new());
        let (status, body) = send(app, get("/photos/999")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_rejected_without_store_call() {
        let app = router(
            MockPhotoRepository::new(),
            MockImageGenerator::new(),
            MockStorageProbe::new(),
        );

        let (status, body) = send(app, get("/photos/abc")).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_id_beyond_serial_range_is_404_without_store_call() {
        // No store expectations: any call would panic
        let app = router(
            MockPhotoRepository::new(),
            MockImageGenerator::new(),
            MockStorageProbe::new(),
        );

        let (status, body) = send(app, get("/photos/3000000000")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Photo 3000000000 not found");
    }

    #[tokio::test]
    async fn test_list_endpoints_project_each_column() {
        let mut store = MockPhotoRepository::new();
        store
            .expect_list_original()
            .returning(|| Ok(vec!["https://a/1.jpg".to_string(), "https://a/3.jpg".to_string()]));
        store
            .expect_list_dalle()
            .returning(|| Ok(vec!["https://a/2.jpg".to_string(), "https://a/4.jpg".to_string()]));
        let app = router(store, MockImageGenerator::new(), MockStorageProbe::new());

        let (status, originals) = send(app.clone(), get("/photos/original")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(originals, json!(["https://a/1.jpg", "https://a/3.jpg"]));

        let (status, dalles) = send(app, get("/photos/dalle")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dalles, json!(["https://a/2.jpg", "https://a/4.jpg"]));
    }

    #[tokio::test]
    async fn test_persistence_failure_hides_cause() {
        let mut store = MockPhotoRepository::new();
        store
            .expect_list_dalle()
            .returning(|| Err(StoreError::Persistence(sqlx::Error::PoolTimedOut)));

        let app = router(store, MockImageGenerator::new(), MockStorageProbe::new());
        let (status, body) = send(app, get("/photos/dalle")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Database error");
    }

    #[tokio::test]
    async fn test_generate_image_without_original_skips_store() {
        let mut generator = MockImageGenerator::new();
        generator
            .expect_generate()
            .withf(|prompt| prompt == "a cat on a roof")
            .times(1)
            .returning(|_| Ok("https://images.example/cat.png".to_string()));

        // No store expectations: any call would panic
        let app = router(MockPhotoRepository::new(), generator, MockStorageProbe::new());
        let (status, body) = send(
            app,
            post_json("/generate-image", json!({ "content": "a cat on a roof" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "image_url": "https://images.example/cat.png" }));
    }

    #[tokio::test]
    async fn test_generate_image_records_pair() {
        let mut generator = MockImageGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok("https://images.example/cat.png".to_string()));

        let mut store = MockPhotoRepository::new();
        store
            .expect_create()
            .withf(|original, dalle| {
                original == "https://a/1.jpg" && dalle == "https://images.example/cat.png"
            })
            .times(1)
            .returning(|original, dalle| Ok(record(1, original, dalle)));

        let app = router(store, generator, MockStorageProbe::new());
        let (status, body) = send(
            app,
            post_json(
                "/generate-image",
                json!({ "content": "a cat", "original_url": "https://a/1.jpg" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["photo_id"], 1);
        assert_eq!(body["image_url"], "https://images.example/cat.png");
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_before_upstream() {
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().times(0);

        let app = router(MockPhotoRepository::new(), generator, MockStorageProbe::new());
        let (status, body) =
            send(app, post_json("/generate-image", json!({ "content": "  " }))).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], "content must not be empty");
    }

    #[tokio::test]
    async fn test_oversized_original_url_is_rejected() {
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().times(0);

        let long_url = format!("https://a/{}", "x".repeat(MAX_URL_LEN));
        let app = router(MockPhotoRepository::new(), generator, MockStorageProbe::new());
        let (status, _) = send(
            app,
            post_json(
                "/generate-image",
                json!({ "content": "a cat", "original_url": long_url }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_client_errors() {
        let app = router(
            MockPhotoRepository::new(),
            MockImageGenerator::new(),
            MockStorageProbe::new(),
        );

        // Wrong shape
        let (status, body) = send(
            app.clone(),
            post_json("/generate-image", json!({ "prompt": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());

        // Not JSON at all
        let request = Request::builder()
            .method("POST")
            .uri("/generate-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_failed_insert_after_generation_is_500_without_photo_id() {
        let mut generator = MockImageGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok("https://images.example/cat.png".to_string()));

        let mut store = MockPhotoRepository::new();
        store
            .expect_create()
            .times(1)
            .returning(|_, _| Err(StoreError::Persistence(sqlx::Error::PoolTimedOut)));

        let app = router(store, generator, MockStorageProbe::new());
        let (status, body) = send(
            app,
            post_json(
                "/generate-image",
                json!({ "content": "a cat", "original_url": "https://a/1.jpg" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Database error");
        assert!(body.get("photo_id").is_none());
        assert!(body.get("image_url").is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_passes_message_and_records_nothing() {
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().returning(|_| {
            Err(GenerationError::Upstream {
                status: 400,
                message: "Billing hard limit has been reached".to_string(),
            })
        });

        let app = router(MockPhotoRepository::new(), generator, MockStorageProbe::new());
        let (status, body) = send(
            app,
            post_json(
                "/generate-image",
                json!({ "content": "a cat", "original_url": "https://a/1.jpg" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("Billing hard limit has been reached"));
    }

    #[tokio::test]
    async fn test_s3_check_lists_buckets() {
        let mut probe = MockStorageProbe::new();
        probe
            .expect_list_buckets()
            .returning(|| Ok(vec!["photos-original".to_string(), "photos-dalle".to_string()]));

        let app = router(MockPhotoRepository::new(), MockImageGenerator::new(), probe);
        let (status, body) = send(app, get("/test-s3")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "buckets": ["photos-original", "photos-dalle"] }));
    }

    #[tokio::test]
    async fn test_s3_check_failure_leaves_store_untouched() {
        let mut probe = MockStorageProbe::new();
        probe
            .expect_list_buckets()
            .returning(|| Err(ProbeError("InvalidAccessKeyId".to_string())));

        let app = router(MockPhotoRepository::new(), MockImageGenerator::new(), probe);
        let (status, body) = send(app, get("/test-s3")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("S3 connectivity check failed"));
        assert!(detail.contains("InvalidAccessKeyId"));
    }

    #[tokio::test]
    async fn test_readiness_reflects_database() {
        let mut store = MockPhotoRepository::new();
        store
            .expect_ping()
            .returning(|| Err(StoreError::Persistence(sqlx::Error::PoolClosed)));

        let app = router(store, MockImageGenerator::new(), MockStorageProbe::new());
        let (status, body) = send(app, get("/ready")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"], "disconnected");
    }
}
