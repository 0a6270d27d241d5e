//! On-disk image cache: one artifact plus its metadata record.
//!
//! All mutations of the metadata hold the write lock for their whole
//! check-mutate-persist sequence. The network fetch runs without any lock;
//! only the final artifact rename and metadata update are serialized.
//!
//! The rename and the metadata write are blocking filesystem calls made on
//! the calling worker thread while the std lock is held. Both touch a single
//! small file in one directory; the artifact body itself is staged through
//! `spawn_blocking` before the lock is taken.

use std::{
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::source::{FetchError, ImageSource};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};
use super::metadata::{self, CacheMetadata, LoadStatus};
use super::policy::{self, CacheStatus, Freshness};

const SOURCE: &str = "todo_frontend::cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to prepare cache directory `{path}`: {source}")]
    DirectoryInit {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to store fetched artifact: {0}")]
    ArtifactWrite(#[source] io::Error),
}

/// Read-only view of the cache at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    #[serde(flatten)]
    pub metadata: CacheMetadata,
    pub status: CacheStatus,
    pub artifact_present: bool,
    pub ttl_seconds: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

pub struct ImageCache {
    config: CacheConfig,
    artifact_path: PathBuf,
    metadata_path: PathBuf,
    clock: Arc<dyn Clock>,
    metadata: RwLock<CacheMetadata>,
    load_status: LoadStatus,
}

impl ImageCache {
    /// Open the cache directory using the system clock.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the cache directory, creating it when absent.
    ///
    /// Missing or malformed metadata is replaced by persisted defaults; only a
    /// directory that cannot be created is an error.
    pub fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        std::fs::create_dir_all(config.directory()).map_err(|source| CacheError::DirectoryInit {
            path: config.directory().display().to_string(),
            source,
        })?;

        let artifact_path = config.artifact_path();
        let metadata_path = config.metadata_path();
        let outcome = metadata::load(&metadata_path);

        match &outcome.status {
            LoadStatus::Loaded => info!(
                target = SOURCE,
                op = "open",
                result = "loaded",
                path = %metadata_path.display(),
                access_count = outcome.metadata.access_count,
                "Loaded cache metadata"
            ),
            LoadStatus::Missing => info!(
                target = SOURCE,
                op = "open",
                result = "missing",
                path = %metadata_path.display(),
                "No cache metadata found; initializing defaults"
            ),
            LoadStatus::Recovered { reason } => {
                counter!("todo_frontend_metadata_recovered_total").increment(1);
                warn!(
                    target = SOURCE,
                    op = "open",
                    result = "recovered",
                    path = %metadata_path.display(),
                    reason = %reason,
                    "Cache metadata unreadable; resetting to defaults"
                );
            }
        }

        if outcome.status.is_default() {
            persist(&metadata_path, &outcome.metadata, "open");
        }

        info!(
            target = SOURCE,
            op = "open",
            directory = %config.directory().display(),
            ttl_seconds = config.ttl.as_secs(),
            "Image cache ready"
        );

        Ok(Self {
            config,
            artifact_path,
            metadata_path,
            clock,
            metadata: RwLock::new(outcome.metadata),
            load_status: outcome.status,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// How the metadata was obtained when the cache was opened.
    pub fn load_status(&self) -> &LoadStatus {
        &self.load_status
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn artifact_exists(&self) -> bool {
        self.artifact_path.is_file()
    }

    pub fn is_expired(&self) -> bool {
        let guard = rw_read(&self.metadata, SOURCE, "is_expired");
        policy::is_expired(
            self.clock.now(),
            guard.download_timestamp,
            self.config.ttl,
            self.artifact_exists(),
        )
    }

    /// What a serve request should do right now. Advisory only: grace must
    /// still be claimed through `consume_grace_period`.
    pub fn freshness(&self) -> Freshness {
        let guard = rw_read(&self.metadata, SOURCE, "freshness");
        policy::evaluate(
            self.clock.now(),
            &guard,
            self.config.ttl,
            self.artifact_exists(),
        )
    }

    /// Fetch a new artifact and swap it in.
    ///
    /// On any failure the previous artifact and metadata stay untouched.
    pub async fn fetch_and_replace(&self, source: &dyn ImageSource) -> Result<(), CacheError> {
        let started_at = Instant::now();
        let origin = source.describe();

        let bytes = match source.fetch().await {
            Ok(bytes) => bytes,
            Err(err) => {
                counter!("todo_frontend_image_fetch_total", "result" => "failure").increment(1);
                warn!(
                    target = SOURCE,
                    op = "fetch_and_replace",
                    result = "error",
                    error_code = err.code(),
                    origin = %origin,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Failed to fetch image"
                );
                return Err(CacheError::Fetch(err));
            }
        };

        let size = bytes.len();
        let staged = self.stage_artifact(bytes).await.map_err(|err| {
            counter!("todo_frontend_image_fetch_total", "result" => "failure").increment(1);
            warn!(
                target = SOURCE,
                op = "fetch_and_replace",
                result = "error",
                error_code = "stage_artifact",
                error = %err,
                "Failed to stage fetched image"
            );
            CacheError::ArtifactWrite(err)
        })?;

        // Blocking rename and metadata write under the std lock. No await
        // may happen until the guard is dropped.
        let downloaded_at = {
            let mut guard = rw_write(&self.metadata, SOURCE, "fetch_and_replace");
            staged.persist(&self.artifact_path).map_err(|err| {
                counter!("todo_frontend_image_fetch_total", "result" => "failure").increment(1);
                warn!(
                    target = SOURCE,
                    op = "fetch_and_replace",
                    result = "error",
                    error_code = "persist_artifact",
                    error = %err.error,
                    "Failed to move fetched image into place"
                );
                CacheError::ArtifactWrite(err.error)
            })?;

            let now = self.clock.now();
            guard.mark_fetched(now);
            persist(&self.metadata_path, &guard, "fetch_and_replace");
            now
        };

        counter!("todo_frontend_image_fetch_total", "result" => "success").increment(1);
        info!(
            target = SOURCE,
            op = "fetch_and_replace",
            result = "ok",
            origin = %origin,
            bytes = size,
            downloaded_at = %downloaded_at,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Image fetched and cached"
        );
        Ok(())
    }

    /// Count one serve. Persistence failures are logged, never raised.
    pub fn record_access(&self) {
        let mut guard = rw_write(&self.metadata, SOURCE, "record_access");
        guard.record_access(self.clock.now());
        persist(&self.metadata_path, &guard, "record_access");
    }

    /// Spend the one grace serve of the current artifact.
    ///
    /// Returns false without mutating anything when grace is already spent,
    /// no artifact exists, or the artifact was never fetched.
    pub fn consume_grace_period(&self) -> bool {
        let mut guard = rw_write(&self.metadata, SOURCE, "consume_grace_period");
        if !policy::grace_available(&guard, self.artifact_exists()) {
            return false;
        }

        guard.grace_period_used = true;
        persist(&self.metadata_path, &guard, "consume_grace_period");
        info!(
            target = SOURCE,
            op = "consume_grace_period",
            result = "granted",
            "Serving expired image under grace period"
        );
        true
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let guard = rw_read(&self.metadata, SOURCE, "snapshot");
        let artifact_present = self.artifact_exists();
        let ttl = self.config.ttl;

        CacheSnapshot {
            metadata: guard.clone(),
            status: policy::status(self.clock.now(), &guard, ttl, artifact_present),
            artifact_present,
            ttl_seconds: ttl.as_secs(),
            expires_at: policy::expires_at(guard.download_timestamp, ttl),
        }
    }

    /// Current artifact bytes, or `None` when nothing has been fetched.
    pub async fn read_artifact(&self) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(&self.artifact_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn stage_artifact(&self, bytes: Bytes) -> io::Result<NamedTempFile> {
        let directory = self.config.directory.clone();
        tokio::task::spawn_blocking(move || {
            let mut staged = NamedTempFile::new_in(&directory)?;
            staged.write_all(&bytes)?;
            staged.as_file().sync_all()?;
            Ok(staged)
        })
        .await
        .map_err(io::Error::other)?
    }
}

fn persist(path: &Path, metadata: &CacheMetadata, op: &'static str) {
    if let Err(err) = metadata::save(path, metadata) {
        counter!("todo_frontend_metadata_write_failed_total").increment(1);
        warn!(
            target = SOURCE,
            op,
            result = "write_failed",
            path = %path.display(),
            error = %err,
            "Failed to persist cache metadata; keeping in-memory state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

    struct StaticSource(&'static [u8]);

    #[async_trait]
    impl ImageSource for StaticSource {
        fn describe(&self) -> String {
            "static".to_string()
        }

        async fn fetch(&self) -> Result<Bytes, FetchError> {
            Ok(Bytes::from_static(self.0))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ImageSource for FailingSource {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        async fn fetch(&self) -> Result<Bytes, FetchError> {
            Err(FetchError::Status { status: 503 })
        }
    }

    fn open(dir: &TempDir, clock: Arc<ManualClock>) -> ImageCache {
        let config = CacheConfig::new(dir.path().join("cache"), Duration::from_secs(600));
        ImageCache::open_with_clock(config, clock).expect("open cache")
    }

    #[test]
    fn open_creates_directory_and_default_metadata() {
        let dir = TempDir::new().expect("temp dir");
        let cache = open(&dir, Arc::new(ManualClock::new(T0)));

        assert_eq!(cache.load_status(), &LoadStatus::Missing);
        assert!(cache.config().metadata_path().is_file());
        assert!(cache.is_expired());
        assert!(!cache.consume_grace_period());
    }

    #[tokio::test]
    async fn fetch_writes_artifact_and_resets_cycle() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, clock.clone());

        cache.record_access();
        cache
            .fetch_and_replace(&StaticSource(b"jpeg-1"))
            .await
            .expect("fetch succeeds");

        let snapshot = cache.snapshot();
        assert!(!cache.is_expired());
        assert_eq!(snapshot.status, CacheStatus::Valid);
        assert_eq!(snapshot.metadata.download_timestamp, Some(T0));
        assert_eq!(snapshot.metadata.image_access_count, 0);
        assert_eq!(snapshot.metadata.access_count, 1);
        assert_eq!(
            cache.read_artifact().await.expect("read artifact"),
            Some(Bytes::from_static(b"jpeg-1"))
        );
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, clock.clone());
        cache
            .fetch_and_replace(&StaticSource(b"original"))
            .await
            .expect("first fetch");

        clock.advance(time::Duration::seconds(601));
        assert!(cache.consume_grace_period());
        let before = cache.snapshot();

        let err = cache
            .fetch_and_replace(&FailingSource)
            .await
            .expect_err("fetch fails");
        assert!(matches!(err, CacheError::Fetch(FetchError::Status { status: 503 })));

        let after = cache.snapshot();
        assert_eq!(after, before);
        assert!(after.metadata.grace_period_used);
        assert_eq!(
            cache.read_artifact().await.expect("read artifact"),
            Some(Bytes::from_static(b"original"))
        );
    }

    #[tokio::test]
    async fn grace_is_granted_once_per_fetch_cycle() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T0));
        let cache = open(&dir, clock.clone());
        cache
            .fetch_and_replace(&StaticSource(b"a"))
            .await
            .expect("fetch");

        clock.advance(time::Duration::seconds(700));
        assert!(cache.consume_grace_period());
        assert!(!cache.consume_grace_period());
        assert_eq!(cache.snapshot().status, CacheStatus::Grace);

        cache
            .fetch_and_replace(&StaticSource(b"b"))
            .await
            .expect("refetch");
        assert!(!cache.snapshot().metadata.grace_period_used);

        clock.advance(time::Duration::seconds(700));
        assert!(cache.consume_grace_period());
    }

    #[test]
    fn grace_refused_when_artifact_file_vanished() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T0));
        let config = CacheConfig::new(dir.path().join("cache"), Duration::from_secs(600));
        std::fs::create_dir_all(config.directory()).expect("mkdir");
        metadata::save(
            &config.metadata_path(),
            &CacheMetadata {
                download_timestamp: Some(T0),
                ..Default::default()
            },
        )
        .expect("seed metadata");

        let cache = ImageCache::open_with_clock(config, clock).expect("open");
        assert_eq!(cache.load_status(), &LoadStatus::Loaded);
        assert!(cache.is_expired());
        assert!(!cache.consume_grace_period());
    }

    #[test]
    fn counters_survive_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(T0));
        {
            let cache = open(&dir, clock.clone());
            for _ in 0..3 {
                cache.record_access();
            }
        }

        let reopened = open(&dir, clock);
        let snapshot = reopened.snapshot();
        assert_eq!(reopened.load_status(), &LoadStatus::Loaded);
        assert_eq!(snapshot.metadata.access_count, 3);
        assert_eq!(snapshot.metadata.image_access_count, 3);
        assert_eq!(snapshot.metadata.last_access_time, Some(T0));
    }

    #[test]
    fn corrupt_metadata_is_rewritten_with_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let config = CacheConfig::new(dir.path().join("cache"), Duration::from_secs(600));
        std::fs::create_dir_all(config.directory()).expect("mkdir");
        std::fs::write(config.metadata_path(), b"\x00\x01garbage").expect("corrupt");

        let cache = ImageCache::open_with_clock(config.clone(), Arc::new(ManualClock::new(T0)))
            .expect("open");

        assert!(matches!(cache.load_status(), LoadStatus::Recovered { .. }));
        assert_eq!(cache.snapshot().metadata, CacheMetadata::default());
        assert_eq!(
            metadata::load(&config.metadata_path()).status,
            LoadStatus::Loaded
        );
    }
}
