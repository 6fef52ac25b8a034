//! Storage abstraction traits
//!
//! Defines the interface for persisting registered face samples.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use image::GrayImage;

use crate::engine::UserId;

/// Face sample storage
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait SampleStore: Send + Sync + 'static {
    /// Persist the sample for a user, replacing any previous one
    async fn save_sample(&self, user_id: UserId, sample: &GrayImage) -> Result<PathBuf>;

    /// Load every stored sample, keyed by user id
    async fn load_samples(&self) -> Result<BTreeMap<UserId, GrayImage>>;

    /// Directory the samples live in
    fn root(&self) -> &Path;
}

/// File name of a user's stored sample
pub fn sample_file_name(user_id: UserId) -> String {
    format!("{}.jpg", user_id)
}

/// Parse a user id back out of a sample file name
pub fn parse_sample_file_name(name: &str) -> Option<UserId> {
    let stem = name.strip_suffix(".jpg")?;
    stem.parse().ok()
}
