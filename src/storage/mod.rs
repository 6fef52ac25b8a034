//! Storage module for face sample persistence

pub mod traits;
pub mod disk;

pub use traits::{sample_file_name, SampleStore};
pub use disk::DiskSampleStore;
