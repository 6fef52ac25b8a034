//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post},
    extract::{State, Multipart, DefaultBodyLimit},
    http::StatusCode,
    response::Json,
};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::engine::UserId;
use crate::service::{FaceError, FaceService};
use crate::storage::SampleStore;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState<S: SampleStore> {
    pub service: Arc<FaceService<S>>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router<S: SampleStore>(state: Arc<AppState<S>>, body_limit: usize) -> Router {
    let faces_dir = state.service.store().root().to_path_buf();

    Router::new()
        .route("/register", post(register_handler::<S>))
        .route("/recognize", post(recognize_handler::<S>))
        .route("/reload-faces", get(reload_handler::<S>))
        .route("/users", get(users_handler::<S>))
        .route("/health", get(health_handler::<S>))
        // Stored samples
        .nest_service("/faces", ServeDir::new(faces_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map a service error onto a status code and JSON body
fn error_response(err: FaceError) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        error!("Request failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(ErrorResponse::new(&err.to_string(), err.code())))
}

/// Fields of a register/recognize upload
#[derive(Default)]
struct UploadForm {
    image: Option<Vec<u8>>,
    user_id: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, FaceError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FaceError::Multipart(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "image" => {
                let bytes = field.bytes().await.map_err(|e| FaceError::Multipart(e.to_string()))?;
                form.image = Some(bytes.to_vec());
            }
            "user_id" => {
                let text = field.text().await.map_err(|e| FaceError::Multipart(e.to_string()))?;
                form.user_id = Some(text);
            }
            _ => {}
        }
    }

    Ok(form)
}

fn parse_user_id(raw: &str) -> Result<UserId, FaceError> {
    raw.trim().parse().map_err(|_| FaceError::InvalidUserId)
}

/// Register a face
async fn register_handler<S: SampleStore>(
    State(state): State<Arc<AppState<S>>>,
    multipart: Multipart,
) -> Result<Json<RegisterResponse>, ApiError> {
    let form = read_form(multipart).await.map_err(error_response)?;

    let (image, raw_user_id) = match (form.image, form.user_id) {
        (Some(image), Some(user_id)) if !user_id.trim().is_empty() => (image, user_id),
        _ => return Err(error_response(FaceError::MissingImageOrUserId)),
    };
    let user_id = parse_user_id(&raw_user_id).map_err(error_response)?;

    let result = state.service.register(image, user_id).await.map_err(error_response)?;

    Ok(Json(RegisterResponse {
        success: true,
        user_id: result.user_id,
    }))
}

/// Recognize the best-matching registered face
async fn recognize_handler<S: SampleStore>(
    State(state): State<Arc<AppState<S>>>,
    multipart: Multipart,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let form = read_form(multipart).await.map_err(error_response)?;

    let image = match form.image {
        Some(image) => image,
        None => {
            info!("Recognize request without an image");
            return Err(error_response(FaceError::MissingImage));
        }
    };

    let result = state.service.recognize(image).await.map_err(error_response)?;

    Ok(Json(RecognizeResponse {
        success: true,
        user_id: result.user_id,
        confidence: result.confidence,
    }))
}

/// Rescan the faces directory into the gallery
async fn reload_handler<S: SampleStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let loaded = state.service.reload().await.map_err(error_response)?;

    Ok(Json(ReloadResponse {
        success: true,
        loaded,
    }))
}

/// List registered user ids
async fn users_handler<S: SampleStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.service.users().await.map_err(error_response)?;

    Ok(Json(UsersResponse {
        count: users.len(),
        users,
    }))
}

/// Health check
async fn health_handler<S: SampleStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let health = state.service.health().await;

    Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        backend: health.backend,
        registered_faces: health.registered_faces,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
