//! Cache configuration.
//!
//! Resolved from the `[cache]` section of the service settings.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use super::metadata::METADATA_FILE_NAME;

const DEFAULT_CACHE_DIR: &str = "./cache";
const DEFAULT_TTL_SECS: u64 = 600;

pub const ARTIFACT_FILE_NAME: &str = "cached_image.jpg";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory owning the artifact and its metadata record.
    pub directory: PathBuf,
    /// Maximum artifact age before it stops being fresh.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_CACHE_DIR),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            ttl: settings.ttl,
        }
    }
}

impl CacheConfig {
    pub fn new(directory: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            directory: directory.into(),
            ttl,
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.directory.join(ARTIFACT_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.directory.join(METADATA_FILE_NAME)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
