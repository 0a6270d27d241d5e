//! Serve-time freshness flow over the image cache.
//!
//! Every serve request runs the same sequence: check expiry, then either
//! spend the grace serve or refresh, then record exactly one access.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheSnapshot, Freshness, ImageCache};

use super::source::ImageSource;

const SOURCE: &str = "todo_frontend::application::serve";

/// Which branch a serve request took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The artifact was within its TTL.
    Fresh,
    /// The artifact was expired and served once more under grace.
    GraceServed,
    /// A new artifact was fetched and served.
    Refreshed,
    /// The refresh failed and the previous artifact is served stale.
    StaleAfterFailedRefresh,
    /// The refresh failed and there is nothing to fall back to.
    Unavailable,
}

impl ServeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ServeOutcome::Fresh => "fresh",
            ServeOutcome::GraceServed => "grace",
            ServeOutcome::Refreshed => "refreshed",
            ServeOutcome::StaleAfterFailedRefresh => "stale",
            ServeOutcome::Unavailable => "unavailable",
        }
    }

    pub fn has_image(self) -> bool {
        !matches!(self, ServeOutcome::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct ServeResult {
    pub outcome: ServeOutcome,
    /// Cache state after the access was recorded.
    pub snapshot: CacheSnapshot,
}

/// Result of the start-up refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    AlreadyFresh,
    Fetched,
    Failed,
}

#[derive(Clone)]
pub struct ImageService {
    cache: Arc<ImageCache>,
    source: Arc<dyn ImageSource>,
}

impl ImageService {
    pub fn new(cache: Arc<ImageCache>, source: Arc<dyn ImageSource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Decide what to serve for one request and record the access.
    pub async fn serve(&self) -> ServeResult {
        let outcome = self.decide().await;

        self.cache.record_access();
        counter!("todo_frontend_image_serve_total", "outcome" => outcome.as_str()).increment(1);

        ServeResult {
            outcome,
            snapshot: self.cache.snapshot(),
        }
    }

    async fn decide(&self) -> ServeOutcome {
        match self.cache.freshness() {
            Freshness::Fresh => {
                info!(
                    target = SOURCE,
                    op = "serve",
                    outcome = "fresh",
                    "Cache valid, serving cached image"
                );
                return ServeOutcome::Fresh;
            }
            Freshness::GraceEligible if self.cache.consume_grace_period() => {
                info!(
                    target = SOURCE,
                    op = "serve",
                    outcome = "grace",
                    "Cache expired, serving under grace period"
                );
                return ServeOutcome::GraceServed;
            }
            Freshness::GraceEligible | Freshness::RefreshRequired => {}
        }

        info!(
            target = SOURCE,
            op = "serve",
            "Cache expired without grace; fetching new image"
        );
        match self.cache.fetch_and_replace(self.source.as_ref()).await {
            Ok(()) => ServeOutcome::Refreshed,
            Err(err) if self.cache.artifact_exists() => {
                warn!(
                    target = SOURCE,
                    op = "serve",
                    outcome = "stale",
                    error = %err,
                    "Refresh failed; serving stale image"
                );
                ServeOutcome::StaleAfterFailedRefresh
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "serve",
                    outcome = "unavailable",
                    error = %err,
                    "Refresh failed and no cached image exists"
                );
                ServeOutcome::Unavailable
            }
        }
    }

    /// Refresh once at start-up when the cache is expired. Does not record
    /// an access and never spends grace.
    pub async fn warmup(&self) -> WarmupOutcome {
        if !self.cache.is_expired() {
            info!(
                target = SOURCE,
                op = "warmup",
                "Cache valid on startup, using existing image"
            );
            return WarmupOutcome::AlreadyFresh;
        }

        match self.refresh().await {
            Ok(()) => WarmupOutcome::Fetched,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "warmup",
                    error = %err,
                    "Failed to fetch image on startup"
                );
                WarmupOutcome::Failed
            }
        }
    }

    /// Unconditionally fetch a new artifact.
    pub async fn refresh(&self) -> Result<(), CacheError> {
        self.cache.fetch_and_replace(self.source.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::source::FetchError;
    use crate::cache::{CacheConfig, CacheStatus, ManualClock};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use time::macros::datetime;

    /// Source whose availability can be toggled and whose calls are counted.
    #[derive(Default)]
    struct ToggleSource {
        down: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageSource for ToggleSource {
        fn describe(&self) -> String {
            "toggle".to_string()
        }

        async fn fetch(&self) -> Result<Bytes, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(FetchError::transport("connection refused"));
            }
            Ok(Bytes::from(format!("image-{call}")))
        }
    }

    fn service(dir: &TempDir) -> (ImageService, Arc<ManualClock>, Arc<ToggleSource>) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 12:00 UTC)));
        let config = CacheConfig::new(dir.path(), Duration::from_secs(600));
        let cache = Arc::new(ImageCache::open_with_clock(config, clock.clone()).expect("open"));
        let source = Arc::new(ToggleSource::default());
        (ImageService::new(cache, source.clone()), clock, source)
    }

    #[tokio::test]
    async fn first_serve_fetches() {
        let dir = TempDir::new().expect("temp dir");
        let (service, _, source) = service(&dir);

        let result = service.serve().await;

        assert_eq!(result.outcome, ServeOutcome::Refreshed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.snapshot.metadata.access_count, 1);
        assert_eq!(result.snapshot.metadata.image_access_count, 1);
        assert_eq!(result.snapshot.status, CacheStatus::Valid);
    }

    #[tokio::test]
    async fn expired_serve_uses_grace_before_fetching() {
        let dir = TempDir::new().expect("temp dir");
        let (service, clock, source) = service(&dir);
        service.serve().await;

        clock.advance(time::Duration::seconds(601));
        let grace = service.serve().await;
        assert_eq!(grace.outcome, ServeOutcome::GraceServed);
        assert_eq!(grace.snapshot.status, CacheStatus::Grace);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let refreshed = service.serve().await;
        assert_eq!(refreshed.outcome, ServeOutcome::Refreshed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.snapshot.metadata.image_access_count, 1);
        assert_eq!(refreshed.snapshot.metadata.access_count, 3);
    }

    #[tokio::test]
    async fn failed_refresh_degrades_to_stale_then_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let (service, clock, source) = service(&dir);
        source.down.store(true, Ordering::SeqCst);

        let empty = service.serve().await;
        assert_eq!(empty.outcome, ServeOutcome::Unavailable);
        assert!(!empty.outcome.has_image());
        assert_eq!(empty.snapshot.metadata.access_count, 1);

        source.down.store(false, Ordering::SeqCst);
        service.serve().await;
        clock.advance(time::Duration::seconds(601));
        service.serve().await;

        source.down.store(true, Ordering::SeqCst);
        let stale = service.serve().await;
        assert_eq!(stale.outcome, ServeOutcome::StaleAfterFailedRefresh);
        assert!(stale.snapshot.metadata.grace_period_used);
        assert_eq!(stale.snapshot.metadata.access_count, 4);
    }

    #[tokio::test]
    async fn warmup_only_fetches_when_expired() {
        let dir = TempDir::new().expect("temp dir");
        let (service, _, source) = service(&dir);

        assert_eq!(service.warmup().await, WarmupOutcome::Fetched);
        assert_eq!(service.warmup().await, WarmupOutcome::AlreadyFresh);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache().snapshot().metadata.access_count, 0);
    }

    #[tokio::test]
    async fn warmup_failure_is_not_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let (service, _, source) = service(&dir);
        source.down.store(true, Ordering::SeqCst);

        assert_eq!(service.warmup().await, WarmupOutcome::Failed);
        assert!(service.cache().is_expired());
    }
}
