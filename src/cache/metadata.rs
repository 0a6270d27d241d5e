//! Persistent metadata record describing the cached artifact.
//!
//! The record lives next to the artifact as a single JSON object. Every
//! field is optional on read so older or hand-edited files still load.
//! Timestamps are written as RFC 3339; epoch seconds (integer or float) are
//! accepted on read and rewritten as RFC 3339 on the next save.

use std::{
    io::{ErrorKind, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

pub const METADATA_FILE_NAME: &str = "cache_metadata.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMetadata {
    /// When the current artifact was fetched; `None` until the first fetch succeeds.
    #[serde(with = "timestamp")]
    pub download_timestamp: Option<OffsetDateTime>,
    /// Whether the single grace serve for the current artifact is spent.
    pub grace_period_used: bool,
    /// Lifetime serve count for the cache directory.
    pub access_count: u64,
    /// Serve count for the current artifact.
    pub image_access_count: u64,
    #[serde(with = "timestamp")]
    pub last_access_time: Option<OffsetDateTime>,
}

impl CacheMetadata {
    pub(crate) fn record_access(&mut self, now: OffsetDateTime) {
        self.access_count = self.access_count.saturating_add(1);
        self.image_access_count = self.image_access_count.saturating_add(1);
        self.last_access_time = Some(now);
    }

    pub(crate) fn mark_fetched(&mut self, now: OffsetDateTime) {
        self.download_timestamp = Some(now);
        self.grace_period_used = false;
        self.image_access_count = 0;
    }

    /// Grace can only be spent on an artifact that was actually fetched.
    /// Returns true when the record had to be corrected.
    fn normalize(&mut self) -> bool {
        if self.grace_period_used && self.download_timestamp.is_none() {
            self.grace_period_used = false;
            return true;
        }
        false
    }
}

mod timestamp {
    use serde::{Deserialize, Deserializer, de::Error as _};
    use time::{Duration, OffsetDateTime};

    pub use time::serde::rfc3339::option::serialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Rfc3339(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
        EpochSeconds(f64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Stored>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Stored::Rfc3339(value)) => Ok(Some(value)),
            Some(Stored::EpochSeconds(seconds)) => from_epoch_seconds(seconds)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid epoch timestamp {seconds}"))),
        }
    }

    fn from_epoch_seconds(seconds: f64) -> Option<OffsetDateTime> {
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.trunc();
        let nanos = ((seconds - whole) * 1e9).round() as i64;
        let base = OffsetDateTime::from_unix_timestamp(whole as i64).ok()?;
        base.checked_add(Duration::nanoseconds(nanos))
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("metadata path `{0}` has no parent directory")]
    NoParent(String),
}

/// How the in-memory record was obtained from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// The file existed and parsed.
    Loaded,
    /// No file existed; defaults were used.
    Missing,
    /// The file could not be read or parsed; defaults were used.
    Recovered { reason: String },
}

impl LoadStatus {
    pub fn is_default(&self) -> bool {
        !matches!(self, LoadStatus::Loaded)
    }
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub metadata: CacheMetadata,
    pub status: LoadStatus,
}

impl LoadOutcome {
    fn defaults(status: LoadStatus) -> Self {
        Self {
            metadata: CacheMetadata::default(),
            status,
        }
    }
}

/// Read the metadata file. Never fails: unreadable or malformed content
/// degrades to default metadata with a `Recovered` status.
pub fn load(path: &Path) -> LoadOutcome {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return LoadOutcome::defaults(LoadStatus::Missing);
        }
        Err(err) => {
            return LoadOutcome::defaults(LoadStatus::Recovered {
                reason: format!("read failed: {err}"),
            });
        }
    };

    match serde_json::from_slice::<CacheMetadata>(&raw) {
        Ok(mut metadata) => {
            if metadata.normalize() {
                warn!(
                    target = "todo_frontend::cache::metadata",
                    path = %path.display(),
                    "Cleared grace flag on metadata without a download timestamp"
                );
            }
            LoadOutcome {
                metadata,
                status: LoadStatus::Loaded,
            }
        }
        Err(err) => LoadOutcome::defaults(LoadStatus::Recovered {
            reason: format!("parse failed: {err}"),
        }),
    }
}

/// Replace the metadata file with the serialized record.
///
/// The JSON is written to a sibling temporary file and renamed into place,
/// so a crash mid-write leaves either the old or the new record.
pub fn save(path: &Path, metadata: &CacheMetadata) -> Result<(), MetadataError> {
    let parent = path
        .parent()
        .ok_or_else(|| MetadataError::NoParent(path.display().to_string()))?;
    let encoded = serde_json::to_vec(metadata)?;

    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(&encoded)?;
    staging.flush()?;
    staging.persist(path).map_err(|err| err.error)?;
    Ok(())
}
