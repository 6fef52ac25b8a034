//! Directory-of-JPEGs sample store

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use tracing::{debug, info, warn};

use crate::engine::UserId;
use crate::utils::image::encode_jpeg;

use super::traits::{parse_sample_file_name, sample_file_name, SampleStore};

/// Stores each sample as `<dir>/<user_id>.jpg`
pub struct DiskSampleStore {
    dir: PathBuf,
}

impl DiskSampleStore {
    /// Create the store, making sure the directory exists
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create faces directory {:?}", dir))?;
        Ok(Self { dir })
    }

    fn scan(dir: &Path) -> Result<BTreeMap<UserId, GrayImage>> {
        let mut samples = BTreeMap::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read faces directory {:?}", dir))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(user_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_sample_file_name)
            else {
                debug!("Ignoring {:?}", path);
                continue;
            };

            match image::open(&path) {
                Ok(img) => {
                    samples.insert(user_id, img.to_luma8());
                }
                Err(e) => warn!("Skipping unreadable sample {:?}: {}", path, e),
            }
        }

        Ok(samples)
    }
}

#[async_trait]
impl SampleStore for DiskSampleStore {
    async fn save_sample(&self, user_id: UserId, sample: &GrayImage) -> Result<PathBuf> {
        let path = self.dir.join(sample_file_name(user_id));
        let image = DynamicImage::ImageLuma8(sample.clone());

        let bytes = tokio::task::spawn_blocking(move || encode_jpeg(&image)).await??;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write sample {:?}", path))?;

        info!("Saved face sample to {:?}", path);
        Ok(path)
    }

    async fn load_samples(&self) -> Result<BTreeMap<UserId, GrayImage>> {
        let dir = self.dir.clone();
        let samples = tokio::task::spawn_blocking(move || Self::scan(&dir)).await??;
        info!("Loaded {} face samples from {:?}", samples.len(), self.dir);
        Ok(samples)
    }

    fn root(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::pattern;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disk_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = DiskSampleStore::new(dir.path().join("faces")).unwrap();

        let path = store.save_sample(12, &pattern(1, 40, 40)).await.unwrap();
        assert_eq!(path, dir.path().join("faces").join("12.jpg"));
        assert!(path.exists());

        // Overwrite keeps a single file per user
        store.save_sample(12, &pattern(2, 32, 48)).await.unwrap();
        store.save_sample(3, &pattern(3, 40, 40)).await.unwrap();

        let samples = store.load_samples().await.unwrap();
        assert_eq!(samples.keys().copied().collect::<Vec<_>>(), vec![3, 12]);
        assert_eq!(samples[&12].dimensions(), (32, 48));
    }

    #[tokio::test]
    async fn test_load_skips_foreign_files() {
        let dir = tempdir().unwrap();
        let store = DiskSampleStore::new(dir.path()).unwrap();

        store.save_sample(1, &pattern(1, 40, 40)).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("bob.jpg"), b"not a user id").unwrap();
        std::fs::write(dir.path().join("7.jpg"), b"not a jpeg").unwrap();

        let samples = store.load_samples().await.unwrap();
        assert_eq!(samples.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_load_missing_directory() {
        let dir = tempdir().unwrap();
        let store = DiskSampleStore::new(dir.path().join("faces")).unwrap();
        std::fs::remove_dir(dir.path().join("faces")).unwrap();

        assert!(store.load_samples().await.is_err());
    }
}
