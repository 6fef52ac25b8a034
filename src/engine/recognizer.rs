//! LBPH face recognizer
//!
//! LBP codes come from `imageproc`; each sample becomes a grid of
//! normalized 256-bin histograms and predictions are nearest-neighbour by
//! chi-square distance, the same layout OpenCV's LBPH uses.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use image::GrayImage;
use imageproc::local_binary_patterns::local_binary_pattern;
use tracing::warn;

use crate::config::RecognizerConfig;
use crate::utils::math::{chi_square_alt, normalize_histogram};

use super::{FaceRecognizer, Prediction, UserId};

const LBP_BINS: usize = 256;

pub struct LbphRecognizer {
    grid_x: u32,
    grid_y: u32,
    model: Vec<(UserId, Vec<f32>)>,
}

impl LbphRecognizer {
    pub fn new(config: &RecognizerConfig) -> Self {
        // imageproc only computes the 8-neighbour, radius-1 operator
        if config.radius != 1 || config.neighbors != 8 {
            warn!(
                "Native LBPH uses radius 1 with 8 neighbors; ignoring radius={} neighbors={}",
                config.radius, config.neighbors
            );
        }

        Self {
            grid_x: config.grid_x.max(1),
            grid_y: config.grid_y.max(1),
            model: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.model.is_empty()
    }

    /// Pixel size of one grid cell for a face of this size
    fn cell_size(&self, face: &GrayImage) -> Result<(u32, u32)> {
        let (width, height) = face.dimensions();
        // Border pixels have no full neighbourhood
        let cell_w = width.saturating_sub(2) / self.grid_x;
        let cell_h = height.saturating_sub(2) / self.grid_y;

        if cell_w == 0 || cell_h == 0 {
            bail!(
                "Face sample {}x{} is too small for a {}x{} LBPH grid",
                width,
                height,
                self.grid_x,
                self.grid_y
            );
        }

        Ok((cell_w, cell_h))
    }

    /// Concatenated per-cell LBP histograms
    fn spatial_histogram(&self, face: &GrayImage) -> Result<Vec<f32>> {
        let (cell_w, cell_h) = self.cell_size(face)?;

        let cells = (self.grid_x * self.grid_y) as usize;
        let mut hist = vec![0.0f32; cells * LBP_BINS];

        for gy in 0..self.grid_y {
            for gx in 0..self.grid_x {
                let offset = ((gy * self.grid_x + gx) as usize) * LBP_BINS;
                let cell = &mut hist[offset..offset + LBP_BINS];

                for y in 0..cell_h {
                    for x in 0..cell_w {
                        let px = 1 + gx * cell_w + x;
                        let py = 1 + gy * cell_h + y;
                        if let Some(code) = local_binary_pattern(face, px, py) {
                            cell[code as usize] += 1.0;
                        }
                    }
                }

                normalize_histogram(cell);
            }
        }

        Ok(hist)
    }
}

impl FaceRecognizer for LbphRecognizer {
    fn check_sample(&self, face: &GrayImage) -> Result<()> {
        self.cell_size(face).map(|_| ())
    }

    fn train(&mut self, gallery: &BTreeMap<UserId, GrayImage>) -> Result<()> {
        let mut model = Vec::with_capacity(gallery.len());
        for (&label, sample) in gallery {
            model.push((label, self.spatial_histogram(sample)?));
        }
        self.model = model;
        Ok(())
    }

    fn predict(&mut self, face: &GrayImage) -> Result<Option<Prediction>> {
        if self.model.is_empty() {
            return Ok(None);
        }

        let query = self.spatial_histogram(face)?;

        let best = self
            .model
            .iter()
            .map(|(label, hist)| Prediction {
                label: *label,
                confidence: chi_square_alt(hist, &query),
            })
            .min_by(|a, b| a.confidence.total_cmp(&b.confidence));

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::pattern;

    fn recognizer() -> LbphRecognizer {
        LbphRecognizer::new(&RecognizerConfig::default())
    }

    #[test]
    fn test_untrained_predicts_nothing() {
        let mut rec = recognizer();
        assert!(!rec.is_trained());
        assert!(rec.predict(&pattern(1, 64, 64)).unwrap().is_none());
    }

    #[test]
    fn test_identical_sample_matches_exactly() {
        let mut rec = recognizer();
        let mut gallery = BTreeMap::new();
        gallery.insert(7, pattern(1, 64, 64));
        gallery.insert(9, pattern(5, 64, 64));
        rec.train(&gallery).unwrap();

        let prediction = rec.predict(&pattern(1, 64, 64)).unwrap().unwrap();
        assert_eq!(prediction.label, 7);
        assert!(prediction.confidence.abs() < 1e-9);

        let prediction = rec.predict(&pattern(5, 64, 64)).unwrap().unwrap();
        assert_eq!(prediction.label, 9);
    }

    #[test]
    fn test_retrain_replaces_model() {
        let mut rec = recognizer();
        let mut gallery = BTreeMap::new();
        gallery.insert(1, pattern(1, 48, 48));
        rec.train(&gallery).unwrap();

        gallery.clear();
        rec.train(&gallery).unwrap();
        assert!(!rec.is_trained());
    }

    #[test]
    fn test_too_small_sample() {
        let mut rec = recognizer();
        let mut gallery = BTreeMap::new();
        gallery.insert(1, pattern(1, 8, 8));
        assert!(rec.train(&gallery).is_err());
        assert!(rec.check_sample(&pattern(1, 8, 8)).is_err());
        assert!(rec.check_sample(&pattern(1, 10, 10)).is_ok());
    }

    #[test]
    fn test_histogram_layout() {
        let rec = recognizer();
        let hist = rec.spatial_histogram(&pattern(3, 66, 66)).unwrap();
        assert_eq!(hist.len(), 64 * LBP_BINS);
        // every cell is normalized
        let first_cell: f32 = hist[..LBP_BINS].iter().sum();
        assert!((first_cell - 1.0).abs() < 1e-4);
    }
}
