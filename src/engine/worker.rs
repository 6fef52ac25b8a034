//! Face engine worker
//!
//! The vision backend and the gallery of registered samples are owned by one
//! dedicated thread. Async callers talk to it through an [`EngineHandle`]:
//! each request carries a oneshot sender for its reply, so training and
//! prediction are strictly serialized.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use image::GrayImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::preprocess::crop_face;
use super::{Backend, Prediction, UserId};

const QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("face engine is not running")]
    Unavailable,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Result of a registration attempt
#[derive(Debug)]
pub enum RegisterOutcome {
    NoFaces,
    /// The cropped sample now stored for the user, and the one it replaced
    Registered {
        sample: GrayImage,
        previous: Option<GrayImage>,
    },
}

/// Result of a recognition attempt
#[derive(Debug)]
pub enum RecognizeOutcome {
    NoFaces,
    /// Predictions for detected faces whose label is registered
    Candidates(Vec<Prediction>),
}

enum EngineRequest {
    Register {
        user_id: UserId,
        image: GrayImage,
        reply_tx: oneshot::Sender<Result<RegisterOutcome>>,
    },
    Recognize {
        image: GrayImage,
        reply_tx: oneshot::Sender<Result<RecognizeOutcome>>,
    },
    Replace {
        samples: BTreeMap<UserId, GrayImage>,
        reply_tx: oneshot::Sender<Result<usize>>,
    },
    Restore {
        user_id: UserId,
        previous: Option<GrayImage>,
        reply_tx: oneshot::Sender<Result<()>>,
    },
    Users {
        reply_tx: oneshot::Sender<Vec<UserId>>,
    },
}

/// Client-facing handle for the engine thread
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    backend: &'static str,
}

impl EngineHandle {
    /// Name of the backend the worker runs
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Detect, keep the first face as the user's sample and retrain
    pub async fn register(&self, user_id: UserId, image: GrayImage) -> Result<RegisterOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Register { user_id, image, reply_tx }).await?;
        Ok(reply_rx.await.map_err(|_| EngineError::Unavailable)??)
    }

    /// Detect and predict every face in the image
    pub async fn recognize(&self, image: GrayImage) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Recognize { image, reply_tx }).await?;
        Ok(reply_rx.await.map_err(|_| EngineError::Unavailable)??)
    }

    /// Undo a registration: put back `previous`, or forget the user if there was none
    pub async fn restore(&self, user_id: UserId, previous: Option<GrayImage>) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Restore { user_id, previous, reply_tx }).await?;
        Ok(reply_rx.await.map_err(|_| EngineError::Unavailable)??)
    }

    /// Swap in a new gallery and retrain, dropping samples the recognizer
    /// cannot train on; returns the gallery size
    pub async fn replace(&self, samples: BTreeMap<UserId, GrayImage>) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Replace { samples, reply_tx }).await?;
        Ok(reply_rx.await.map_err(|_| EngineError::Unavailable)??)
    }

    /// Registered user ids, ascending
    pub async fn users(&self) -> Result<Vec<UserId>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Users { reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::Unavailable)
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(request).await.map_err(|_| EngineError::Unavailable)
    }
}

/// Start the engine thread; the backend is built on that thread
pub async fn spawn<F>(factory: F) -> Result<EngineHandle>
where
    F: FnOnce() -> Result<Backend> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_SIZE);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<&'static str>>();

    std::thread::Builder::new()
        .name("face-engine".to_string())
        .spawn(move || {
            let backend = match factory() {
                Ok(backend) => backend,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(backend.name));

            let mut gallery = Gallery::new(backend);
            while let Some(request) = rx.blocking_recv() {
                gallery.handle(request);
            }
            info!("Face engine worker stopped");
        })
        .context("Failed to start face engine thread")?;

    let backend = ready_rx
        .await
        .context("Face engine thread exited during startup")??;

    info!("Face engine ready (backend: {})", backend);
    Ok(EngineHandle { tx, backend })
}

/// Registered samples plus the backend trained on them
struct Gallery {
    backend: Backend,
    samples: BTreeMap<UserId, GrayImage>,
}

impl Gallery {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            samples: BTreeMap::new(),
        }
    }

    fn handle(&mut self, request: EngineRequest) {
        // A dropped receiver means the caller went away; nothing to do
        match request {
            EngineRequest::Register { user_id, image, reply_tx } => {
                let _ = reply_tx.send(self.register(user_id, &image));
            }
            EngineRequest::Recognize { image, reply_tx } => {
                let _ = reply_tx.send(self.recognize(&image));
            }
            EngineRequest::Replace { samples, reply_tx } => {
                let _ = reply_tx.send(self.replace(samples));
            }
            EngineRequest::Restore { user_id, previous, reply_tx } => {
                let _ = reply_tx.send(self.restore(user_id, previous));
            }
            EngineRequest::Users { reply_tx } => {
                let _ = reply_tx.send(self.samples.keys().copied().collect());
            }
        }
    }

    fn register(&mut self, user_id: UserId, image: &GrayImage) -> Result<RegisterOutcome> {
        let faces = self.backend.detector.detect(image)?;
        let Some(first) = faces.first() else {
            return Ok(RegisterOutcome::NoFaces);
        };

        let sample = crop_face(image, first);
        let previous = self.samples.insert(user_id, sample.clone());

        if let Err(e) = self.backend.recognizer.train(&self.samples) {
            // Keep gallery and model consistent
            self.restore(user_id, previous)
                .context("Failed to restore recognizer after rejected sample")?;
            return Err(e.context(format!("Failed to train on sample for user {}", user_id)));
        }

        Ok(RegisterOutcome::Registered {
            sample,
            previous,
        })
    }

    fn restore(&mut self, user_id: UserId, previous: Option<GrayImage>) -> Result<()> {
        match previous {
            Some(old) => self.samples.insert(user_id, old),
            None => self.samples.remove(&user_id),
        };
        self.backend.recognizer.train(&self.samples)
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<RecognizeOutcome> {
        let faces = self.backend.detector.detect(image)?;
        if faces.is_empty() {
            return Ok(RecognizeOutcome::NoFaces);
        }

        let mut candidates = Vec::with_capacity(faces.len());
        for rect in &faces {
            let crop = crop_face(image, rect);
            match self.backend.recognizer.predict(&crop) {
                Ok(Some(prediction)) if self.samples.contains_key(&prediction.label) => {
                    debug!(
                        "Face at ({}, {}) -> user {} (confidence {:.2})",
                        rect.x, rect.y, prediction.label, prediction.confidence
                    );
                    candidates.push(prediction);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unrecognizable face at ({}, {}): {}", rect.x, rect.y, e),
            }
        }

        Ok(RecognizeOutcome::Candidates(candidates))
    }

    fn replace(&mut self, mut samples: BTreeMap<UserId, GrayImage>) -> Result<usize> {
        let recognizer = &self.backend.recognizer;
        samples.retain(|user_id, sample| match recognizer.check_sample(sample) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping sample for user {}: {:#}", user_id, e);
                false
            }
        });

        self.backend.recognizer.train(&samples)?;
        self.samples = samples;
        Ok(self.samples.len())
    }
}
