//! The external fetch operation that produces new artifacts.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("image source answered with status {status}")]
    Status { status: u16 },
    #[error("image source request failed: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Short stable code for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Status { .. } => "status",
            FetchError::Transport(_) => "transport",
        }
    }
}

/// Produces the raw bytes of a fresh artifact.
///
/// Implementations own their timeout policy; the cache waits for as long as
/// `fetch` takes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Where the bytes come from, for diagnostics.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Bytes, FetchError>;
}
