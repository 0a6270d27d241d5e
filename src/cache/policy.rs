//! Freshness policy: pure decisions over `(now, metadata, ttl, artifact presence)`.

use std::{fmt, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;

use super::metadata::CacheMetadata;

/// Display status of the cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Valid,
    Grace,
    Expired,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Valid => "valid",
            CacheStatus::Grace => "grace",
            CacheStatus::Expired => "expired",
        }
    }

    /// Human-facing label used by the page.
    pub fn label(self) -> &'static str {
        match self {
            CacheStatus::Valid => "Valid",
            CacheStatus::Grace => "Grace period",
            CacheStatus::Expired => "Expired",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a serve request should do with the current artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    GraceEligible,
    RefreshRequired,
}

/// An artifact is expired when it is missing, was never fetched, or is
/// strictly older than `ttl`.
pub fn is_expired(
    now: OffsetDateTime,
    download_timestamp: Option<OffsetDateTime>,
    ttl: Duration,
    artifact_exists: bool,
) -> bool {
    let Some(downloaded) = download_timestamp else {
        return true;
    };
    if !artifact_exists {
        return true;
    }
    (now - downloaded) > ttl
}

/// Grace is available once per fetched artifact.
pub fn grace_available(metadata: &CacheMetadata, artifact_exists: bool) -> bool {
    !metadata.grace_period_used && artifact_exists && metadata.download_timestamp.is_some()
}

pub fn evaluate(
    now: OffsetDateTime,
    metadata: &CacheMetadata,
    ttl: Duration,
    artifact_exists: bool,
) -> Freshness {
    if !is_expired(now, metadata.download_timestamp, ttl, artifact_exists) {
        Freshness::Fresh
    } else if grace_available(metadata, artifact_exists) {
        Freshness::GraceEligible
    } else {
        Freshness::RefreshRequired
    }
}

pub fn status(
    now: OffsetDateTime,
    metadata: &CacheMetadata,
    ttl: Duration,
    artifact_exists: bool,
) -> CacheStatus {
    if metadata.grace_period_used {
        CacheStatus::Grace
    } else if !is_expired(now, metadata.download_timestamp, ttl, artifact_exists) {
        CacheStatus::Valid
    } else {
        CacheStatus::Expired
    }
}

/// `download_timestamp + ttl`, when both are representable.
pub fn expires_at(
    download_timestamp: Option<OffsetDateTime>,
    ttl: Duration,
) -> Option<OffsetDateTime> {
    let ttl = time::Duration::try_from(ttl).ok()?;
    download_timestamp?.checked_add(ttl)
}
