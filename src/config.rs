//! Service configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one `<user_id>.jpg` sample per registered user
    pub faces_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Haar cascade XML, used by the OpenCV backend
    pub cascade_path: PathBuf,
    /// SeetaFace model, used by the native backend
    pub model_path: PathBuf,
    pub scale_factor: f64,
    pub min_neighbors: i32,
    pub min_face_size: u32,
    pub score_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub radius: i32,
    pub neighbors: i32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Histogram distance below which a prediction counts as a match
    pub confidence_threshold: f64,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// `FACEROLL_CONFIG` if set, otherwise `config.toml` in the working directory
    pub fn default_path() -> String {
        std::env::var("FACEROLL_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            body_limit_mb: 16,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            faces_dir: PathBuf::from("faces"),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cascade_path: PathBuf::from(
                "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
            ),
            model_path: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            scale_factor: 1.3,
            min_neighbors: 5,
            min_face_size: 20,
            score_threshold: 2.0,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
            confidence_threshold: 70.0,
        }
    }
}
