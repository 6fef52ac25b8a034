//! Vision engine module
//!
//! Face detection and LBPH recognition are delegated to external libraries:
//! - native backend: rustface (SeetaFace cascade) + imageproc LBP codes
//! - `opencv` feature: OpenCV Haar cascade + `face::LBPHFaceRecognizer`
//!
//! The backend and the gallery of registered samples live on a single
//! worker thread; see [`worker`].

pub mod detector;
pub mod recognizer;
pub mod preprocess;
pub mod worker;
#[cfg(feature = "opencv")]
pub mod opencv_backend;

use std::collections::BTreeMap;

use anyhow::Result;
use image::GrayImage;

use crate::config::Config;

pub use detector::SeetaDetector;
pub use recognizer::LbphRecognizer;
pub use worker::{EngineError, EngineHandle, RecognizeOutcome, RegisterOutcome};

/// Registered user identifier, also used as the recognizer label
pub type UserId = i32;

/// Face bounding box in grayscale image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    /// Clamp a raw detector box to the image; `None` if nothing is left
    pub fn clamped(x: i32, y: i32, width: i32, height: i32, img_w: u32, img_h: u32) -> Option<Self> {
        let x1 = x.max(0) as i64;
        let y1 = y.max(0) as i64;
        let x2 = (x as i64 + width as i64).min(img_w as i64);
        let y2 = (y as i64 + height as i64).min(img_h as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// Recognizer output; `confidence` is a histogram distance, lower is better
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: UserId,
    pub confidence: f64,
}

pub trait FaceDetector {
    /// Detect faces, in the order the backend reports them
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceRect>>;
}

pub trait FaceRecognizer {
    /// Reject a sample training would fail on
    fn check_sample(&self, _face: &GrayImage) -> Result<()> {
        Ok(())
    }

    /// Retrain from scratch on the full gallery
    fn train(&mut self, gallery: &BTreeMap<UserId, GrayImage>) -> Result<()>;

    /// Nearest label for a face crop, `None` while untrained
    fn predict(&mut self, face: &GrayImage) -> Result<Option<Prediction>>;
}

/// A detector/recognizer pair
pub struct Backend {
    pub name: &'static str,
    pub detector: Box<dyn FaceDetector>,
    pub recognizer: Box<dyn FaceRecognizer>,
}

/// Build the backend selected at compile time
pub fn load_backend(config: &Config) -> Result<Backend> {
    #[cfg(feature = "opencv")]
    {
        opencv_backend::load(config)
    }

    #[cfg(not(feature = "opencv"))]
    {
        Ok(Backend {
            name: "native",
            detector: Box::new(SeetaDetector::load(&config.detector)?),
            recognizer: Box::new(LbphRecognizer::new(&config.recognizer)),
        })
    }
}
