//! REST API request/response data transfer objects

use serde::Serialize;

/// Register response
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub user_id: i32,
}

/// Recognize response
#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub success: bool,
    #[serde(rename = "userId")]
    pub user_id: i32,
    pub confidence: f64,
}

/// Reload response
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub loaded: usize,
}

/// Registered users
#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<i32>,
    pub count: usize,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub backend: String,
    pub registered_faces: usize,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
