//! OpenCV backend: Haar cascade detection and LBPH recognition
//!
//! Requires a system OpenCV with the contrib `face` module.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use image::GrayImage;
use opencv::core::{Mat, Ptr, Rect, Size, Vector};
use opencv::face::LBPHFaceRecognizer;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use tracing::info;

use crate::config::{Config, DetectorConfig, RecognizerConfig};

use super::{Backend, FaceDetector, FaceRecognizer, FaceRect, Prediction, UserId};

pub fn load(config: &Config) -> Result<Backend> {
    Ok(Backend {
        name: "opencv",
        detector: Box::new(HaarCascadeDetector::load(&config.detector)?),
        recognizer: Box::new(OpenCvLbphRecognizer::new(&config.recognizer)?),
    })
}

/// Copy a grayscale buffer into a single-channel `Mat`
fn gray_to_mat(image: &GrayImage) -> Result<Mat> {
    let flat = Mat::from_slice(image.as_raw().as_slice())?;
    let shaped = flat.reshape(1, image.height() as i32)?;
    Ok(shaped.try_clone()?)
}

pub struct HaarCascadeDetector {
    classifier: CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
    min_size: Size,
}

impl HaarCascadeDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let path = config
            .cascade_path
            .to_str()
            .context("Cascade path is not valid UTF-8")?;

        let classifier = CascadeClassifier::new(path)
            .with_context(|| format!("Failed to load Haar cascade from {}", path))?;
        if classifier.empty()? {
            bail!("Haar cascade at {} is empty or unreadable", path);
        }

        info!("Loaded Haar cascade from {}", path);

        let min = config.min_face_size as i32;
        Ok(Self {
            classifier,
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: Size::new(min, min),
        })
    }
}

impl FaceDetector for HaarCascadeDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceRect>> {
        let mat = gray_to_mat(image)?;
        let mut faces = Vector::<Rect>::new();

        self.classifier.detect_multi_scale(
            &mat,
            &mut faces,
            self.scale_factor,
            self.min_neighbors,
            0,
            self.min_size,
            Size::default(),
        )?;

        Ok(faces
            .iter()
            .filter_map(|r| FaceRect::clamped(r.x, r.y, r.width, r.height, image.width(), image.height()))
            .collect())
    }
}

pub struct OpenCvLbphRecognizer {
    inner: Ptr<LBPHFaceRecognizer>,
    trained: bool,
    min_width: u32,
    min_height: u32,
}

impl OpenCvLbphRecognizer {
    pub fn new(config: &RecognizerConfig) -> Result<Self> {
        // Thresholding happens in the service, so the model always returns a label
        let inner = LBPHFaceRecognizer::create(
            config.radius,
            config.neighbors,
            config.grid_x as i32,
            config.grid_y as i32,
            f64::MAX,
        )?;

        // One LBP pixel per grid cell at the least
        let border = 2 * config.radius.max(1) as u32;
        Ok(Self {
            inner,
            trained: false,
            min_width: border + config.grid_x.max(1),
            min_height: border + config.grid_y.max(1),
        })
    }
}

impl FaceRecognizer for OpenCvLbphRecognizer {
    fn check_sample(&self, face: &GrayImage) -> Result<()> {
        let (width, height) = face.dimensions();
        if width < self.min_width || height < self.min_height {
            bail!(
                "Face sample {}x{} is smaller than the {}x{} LBPH minimum",
                width,
                height,
                self.min_width,
                self.min_height
            );
        }
        Ok(())
    }

    fn train(&mut self, gallery: &BTreeMap<UserId, GrayImage>) -> Result<()> {
        if gallery.is_empty() {
            self.trained = false;
            return Ok(());
        }

        let mut samples = Vector::<Mat>::new();
        let mut labels = Vector::<i32>::new();
        for (&label, sample) in gallery {
            samples.push(gray_to_mat(sample)?);
            labels.push(label);
        }

        self.inner.train(&samples, &labels)?;
        self.trained = true;
        Ok(())
    }

    fn predict(&mut self, face: &GrayImage) -> Result<Option<Prediction>> {
        if !self.trained {
            return Ok(None);
        }

        let mat = gray_to_mat(face)?;
        let mut label = -1;
        let mut confidence = f64::MAX;
        self.inner.predict(&mat, &mut label, &mut confidence)?;

        if label < 0 {
            return Ok(None);
        }

        Ok(Some(Prediction { label, confidence }))
    }
}
