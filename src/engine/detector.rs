//! SeetaFace cascade detector (rustface)
//!
//! Used when the crate is built without the `opencv` feature. The model file
//! (`seeta_fd_frontal_v1.0.bin`) ships with the rustface repository.

use anyhow::{Context, Result};
use image::GrayImage;
use rustface::{Detector, ImageData};
use tracing::debug;

use crate::config::DetectorConfig;

use super::{FaceDetector, FaceRect};

/// rustface rejects minimum face sizes below this
const MIN_FACE_SIZE_FLOOR: u32 = 20;

pub struct SeetaDetector {
    detector: Box<dyn Detector>,
    min_face_size: u32,
}

impl SeetaDetector {
    /// Load the model and apply the detector settings
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let path = config
            .model_path
            .to_str()
            .context("Detector model path is not valid UTF-8")?;

        let mut detector = rustface::create_detector(path)
            .with_context(|| format!("Failed to load face detector model from {}", path))?;

        let min_face_size = config.min_face_size.max(MIN_FACE_SIZE_FLOOR);
        detector.set_min_face_size(min_face_size);
        detector.set_score_thresh(config.score_threshold);
        // Haar-style scale factors grow the window; the pyramid shrinks the image instead
        detector.set_pyramid_scale_factor(pyramid_factor(config.scale_factor));
        detector.set_slide_window_step(4, 4);

        Ok(Self {
            detector,
            min_face_size,
        })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceRect>> {
        let (width, height) = image.dimensions();
        if width < self.min_face_size || height < self.min_face_size {
            return Ok(Vec::new());
        }

        let mut data = ImageData::new(image.as_raw(), width, height);
        let mut faces = self.detector.detect(&mut data);

        // Most confident first, so "first face" means the best one
        faces.sort_by(|a, b| b.score().total_cmp(&a.score()));

        let rects: Vec<FaceRect> = faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceRect::clamped(
                    bbox.x(),
                    bbox.y(),
                    bbox.width() as i32,
                    bbox.height() as i32,
                    width,
                    height,
                )
            })
            .collect();

        debug!("Detected {} faces", rects.len());
        Ok(rects)
    }
}

fn pyramid_factor(scale_factor: f64) -> f32 {
    if scale_factor > 1.0 {
        ((1.0 / scale_factor) as f32).clamp(0.5, 0.95)
    } else {
        0.8
    }
}
