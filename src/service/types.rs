//! Service layer types

use serde::Serialize;
use thiserror::Error;

use crate::engine::{EngineError, UserId};

/// Everything register/recognize can fail with
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("Image and user_id required")]
    MissingImageOrUserId,
    #[error("No image file provided")]
    MissingImage,
    #[error("user_id must be an integer")]
    InvalidUserId,
    #[error("{0}")]
    Multipart(String),
    #[error("No faces detected")]
    NoFacesDetected,
    #[error("No recognizable faces")]
    NoRecognizableFaces,
    #[error("No face matched confidently")]
    NotConfident { confidence: f64 },
    #[error("{0}")]
    InvalidImage(String),
    #[error("face engine is not running")]
    EngineUnavailable,
    #[error("{0:#}")]
    Engine(anyhow::Error),
    #[error("{0:#}")]
    Storage(anyhow::Error),
}

impl FaceError {
    /// Request-level problems the client can fix, as opposed to server faults
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FaceError::MissingImageOrUserId
                | FaceError::MissingImage
                | FaceError::InvalidUserId
                | FaceError::NoFacesDetected
                | FaceError::NoRecognizableFaces
                | FaceError::NotConfident { .. }
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            FaceError::MissingImageOrUserId => "MISSING_FIELDS",
            FaceError::MissingImage => "MISSING_IMAGE",
            FaceError::InvalidUserId => "INVALID_USER_ID",
            FaceError::Multipart(_) => "MULTIPART_ERROR",
            FaceError::NoFacesDetected => "NO_FACES",
            FaceError::NoRecognizableFaces => "NOT_RECOGNIZED",
            FaceError::NotConfident { .. } => "LOW_CONFIDENCE",
            FaceError::InvalidImage(_) => "INVALID_IMAGE",
            FaceError::EngineUnavailable => "ENGINE_UNAVAILABLE",
            FaceError::Engine(_) => "ENGINE_FAILED",
            FaceError::Storage(_) => "STORAGE_FAILED",
        }
    }
}

impl From<EngineError> for FaceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Unavailable => FaceError::EngineUnavailable,
            EngineError::Backend(e) => FaceError::Engine(e),
        }
    }
}

/// Face registration result
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
    pub user_id: UserId,
}

/// Best match of a recognition request
#[derive(Debug, Clone, Serialize)]
pub struct RecognizeResult {
    pub user_id: UserId,
    pub confidence: f64,
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub backend: String,
    pub registered_faces: usize,
}
