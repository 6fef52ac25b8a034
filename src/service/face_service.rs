//! Face Service - Core business logic
//!
//! Orchestrates decoding, the engine worker and sample persistence.

use std::sync::Arc;
use std::time::Instant;

use image::GrayImage;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::engine::preprocess::decode_grayscale;
use crate::engine::{EngineHandle, Prediction, RecognizeOutcome, RegisterOutcome, UserId};
use crate::storage::SampleStore;

use super::types::*;

/// Face registration and recognition service
pub struct FaceService<S: SampleStore> {
    engine: EngineHandle,
    store: Arc<S>,
    confidence_threshold: f64,
    /// Held from gallery update to disk write so both see the same order
    write_lock: Mutex<()>,
}

impl<S: SampleStore> FaceService<S> {
    /// Create a new face service
    pub fn new(engine: EngineHandle, store: Arc<S>, confidence_threshold: f64) -> Self {
        Self {
            engine,
            store,
            confidence_threshold,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the service and load the gallery from the sample directory
    pub async fn start(engine: EngineHandle, store: Arc<S>, confidence_threshold: f64) -> Self {
        let service = Self::new(engine, store, confidence_threshold);
        match service.reload().await {
            Ok(count) => info!("Loaded {} registered faces", count),
            Err(e) => warn!("Starting with an empty gallery: {}", e),
        }
        service
    }

    /// Get a reference to the storage
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Register the first face found in the image as `user_id`'s sample
    pub async fn register(&self, image_data: Vec<u8>, user_id: UserId) -> Result<RegisterResult, FaceError> {
        let start = Instant::now();

        let image = decode(image_data).await?;

        let _guard = self.write_lock.lock().await;

        let (sample, previous) = match self.engine.register(user_id, image).await? {
            RegisterOutcome::NoFaces => return Err(FaceError::NoFacesDetected),
            RegisterOutcome::Registered { sample, previous } => (sample, previous),
        };

        if let Err(e) = self.store.save_sample(user_id, &sample).await {
            // A sample that never reached disk must not stay registered
            if let Err(restore_err) = self.engine.restore(user_id, previous).await {
                error!("Failed to roll back user {} after save error: {}", user_id, restore_err);
            }
            return Err(FaceError::Storage(e));
        }

        info!("Registered face for user {} in {}ms", user_id, start.elapsed().as_millis());

        Ok(RegisterResult { user_id })
    }

    /// Identify the best-matching registered user in the image
    pub async fn recognize(&self, image_data: Vec<u8>) -> Result<RecognizeResult, FaceError> {
        let start = Instant::now();

        let image = decode(image_data).await?;

        let candidates = match self.engine.recognize(image).await? {
            RecognizeOutcome::NoFaces => return Err(FaceError::NoFacesDetected),
            RecognizeOutcome::Candidates(candidates) => candidates,
        };

        let best = best_match(&candidates, self.confidence_threshold)?;

        info!(
            "Recognized user {} (confidence {:.2}) in {}ms",
            best.label,
            best.confidence,
            start.elapsed().as_millis()
        );

        Ok(RecognizeResult {
            user_id: best.label,
            confidence: best.confidence,
        })
    }

    /// Rebuild the gallery from the sample directory
    pub async fn reload(&self) -> Result<usize, FaceError> {
        let _guard = self.write_lock.lock().await;
        let samples = self.store.load_samples().await.map_err(FaceError::Storage)?;
        let count = self.engine.replace(samples).await?;
        info!("Gallery reloaded with {} faces", count);
        Ok(count)
    }

    /// Registered user ids, ascending
    pub async fn users(&self) -> Result<Vec<UserId>, FaceError> {
        Ok(self.engine.users().await?)
    }

    /// Get health status
    pub async fn health(&self) -> HealthResult {
        let registered = self.engine.users().await.map(|u| u.len());

        HealthResult {
            healthy: registered.is_ok(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: self.engine.backend().to_string(),
            registered_faces: registered.unwrap_or(0),
        }
    }
}

/// Decode off the async runtime
async fn decode(image_data: Vec<u8>) -> Result<GrayImage, FaceError> {
    tokio::task::spawn_blocking(move || decode_grayscale(&image_data))
        .await
        .map_err(|e| FaceError::Engine(e.into()))?
        .map_err(|e| FaceError::InvalidImage(format!("{:#}", e)))
}

/// Lowest distance wins; it must also beat the threshold
fn best_match(candidates: &[Prediction], threshold: f64) -> Result<Prediction, FaceError> {
    let best = candidates
        .iter()
        .min_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .copied()
        .ok_or(FaceError::NoRecognizableFaces)?;

    if best.confidence < threshold {
        Ok(best)
    } else {
        warn!(
            "Best match user {} rejected (confidence {:.2} >= {:.2})",
            best.label, best.confidence, threshold
        );
        Err(FaceError::NotConfident {
            confidence: best.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{blind_backend, pattern, whole_frame_backend};
    use crate::engine::worker;
    use crate::storage::DiskSampleStore;
    use crate::utils::image::encode_png;
    use image::DynamicImage;
    use tempfile::tempdir;

    fn png(seed: u32) -> Vec<u8> {
        encode_png(&DynamicImage::ImageLuma8(pattern(seed, 64, 64))).unwrap()
    }

    #[test]
    fn test_best_match_picks_lowest() {
        let candidates = vec![
            Prediction { label: 1, confidence: 40.0 },
            Prediction { label: 2, confidence: 12.5 },
            Prediction { label: 3, confidence: 60.0 },
        ];
        let best = best_match(&candidates, 70.0).unwrap();
        assert_eq!(best.label, 2);
    }

    #[test]
    fn test_best_match_threshold_is_strict() {
        let candidates = vec![Prediction { label: 1, confidence: 70.0 }];
        assert!(matches!(
            best_match(&candidates, 70.0),
            Err(FaceError::NotConfident { .. })
        ));
    }

    #[test]
    fn test_best_match_empty() {
        assert!(matches!(best_match(&[], 70.0), Err(FaceError::NoRecognizableFaces)));
    }

    #[tokio::test]
    async fn test_register_persists_and_recognizes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = FaceService::new(engine, store, 70.0);

        let result = service.register(png(1), 101).await.unwrap();
        assert_eq!(result.user_id, 101);
        assert!(dir.path().join("101.jpg").exists());

        let recognized = service.recognize(png(1)).await.unwrap();
        assert_eq!(recognized.user_id, 101);
        assert!(recognized.confidence < 70.0);

        assert_eq!(service.users().await.unwrap(), vec![101]);
        let health = service.health().await;
        assert!(health.healthy);
        assert_eq!(health.registered_faces, 1);
    }

    #[tokio::test]
    async fn test_recognize_before_any_registration() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = FaceService::new(engine, store, 70.0);

        assert!(matches!(
            service.recognize(png(1)).await,
            Err(FaceError::NoRecognizableFaces)
        ));
    }

    #[tokio::test]
    async fn test_no_faces_detected() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(blind_backend).await.unwrap();
        let service = FaceService::new(engine, store, 70.0);

        assert!(matches!(service.register(png(1), 1).await, Err(FaceError::NoFacesDetected)));
        assert!(matches!(service.recognize(png(1)).await, Err(FaceError::NoFacesDetected)));
        assert!(!dir.path().join("1.jpg").exists());
    }

    #[tokio::test]
    async fn test_low_confidence_rejected() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        // Nothing but an exact match passes
        let service = FaceService::new(engine, store, 1e-9);

        service.register(png(1), 1).await.unwrap();
        assert!(matches!(
            service.recognize(png(8)).await,
            Err(FaceError::NotConfident { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_image() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = FaceService::new(engine, store, 70.0);

        let err = service.register(b"garbage".to_vec(), 1).await.unwrap_err();
        assert!(matches!(err, FaceError::InvalidImage(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_reload_restores_gallery() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());

        let first = FaceService::new(worker::spawn(whole_frame_backend).await.unwrap(), store.clone(), 70.0);
        first.register(png(1), 10).await.unwrap();
        first.register(png(2), 20).await.unwrap();

        // A fresh process only has the directory to go on
        let second = FaceService::new(worker::spawn(whole_frame_backend).await.unwrap(), store, 70.0);
        assert!(second.users().await.unwrap().is_empty());
        assert_eq!(second.reload().await.unwrap(), 2);
        assert_eq!(second.users().await.unwrap(), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_gallery_unchanged() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = FaceService::new(engine, store, 1e-9);

        service.register(png(1), 1).await.unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();

        // New user
        assert!(matches!(service.register(png(2), 5).await, Err(FaceError::Storage(_))));
        assert_eq!(service.users().await.unwrap(), vec![1]);
        assert!(matches!(
            service.recognize(png(2)).await,
            Err(FaceError::NotConfident { .. })
        ));

        // Overwrite of an existing user
        assert!(matches!(service.register(png(3), 1).await, Err(FaceError::Storage(_))));
        assert_eq!(service.recognize(png(1)).await.unwrap().user_id, 1);
    }

    #[tokio::test]
    async fn test_start_loads_gallery() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        store.save_sample(1, &pattern(1, 64, 64)).await.unwrap();
        store.save_sample(2, &pattern(2, 64, 64)).await.unwrap();
        // Decodes fine but is too small to train on
        store.save_sample(3, &pattern(3, 8, 8)).await.unwrap();

        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = FaceService::start(engine, store, 70.0).await;

        assert_eq!(service.users().await.unwrap(), vec![1, 2]);
        assert_eq!(service.recognize(png(2)).await.unwrap().user_id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registers_agree_with_disk() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskSampleStore::new(dir.path()).unwrap());
        let engine = worker::spawn(whole_frame_backend).await.unwrap();
        let service = Arc::new(FaceService::new(engine, store.clone(), 1e-9));

        let seeds: Vec<u32> = (1..=8).collect();
        let tasks: Vec<_> = seeds
            .iter()
            .map(|&seed| {
                let service = service.clone();
                tokio::spawn(async move { service.register(png(seed), 7).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Only the in-memory sample matches exactly
        let mut in_memory = None;
        for &seed in &seeds {
            if service.recognize(png(seed)).await.is_ok() {
                in_memory = Some(seed);
            }
        }

        // JPEG is lossy, so pick the pattern closest to what is on disk
        let on_disk = store.load_samples().await.unwrap().remove(&7).unwrap();
        let distance = |seed: u32| -> u64 {
            pattern(seed, 64, 64)
                .pixels()
                .zip(on_disk.pixels())
                .map(|(a, b)| (a.0[0] as i64 - b.0[0] as i64).unsigned_abs())
                .sum()
        };
        let closest = seeds.iter().copied().min_by_key(|&seed| distance(seed));

        assert!(in_memory.is_some());
        assert_eq!(in_memory, closest);
    }
}
