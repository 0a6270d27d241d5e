//! Image cache with TTL expiry and a single-use grace period.
//!
//! - **Freshness policy** (`policy`): pure decisions over time and metadata.
//! - **Cache store** (`store`): owns the artifact file and its metadata
//!   record, persisted after every mutation so state survives restarts.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "./cache"
//! ttl_seconds = 600
//! ```

mod clock;
mod config;
mod lock;
pub mod metadata;
pub mod policy;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ARTIFACT_FILE_NAME, CacheConfig};
pub use metadata::{CacheMetadata, LoadOutcome, LoadStatus, METADATA_FILE_NAME, MetadataError};
pub use policy::{CacheStatus, Freshness};
pub use store::{CacheError, CacheSnapshot, ImageCache};
