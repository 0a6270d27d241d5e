use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber described by `logging`.
///
/// Logs go to stderr so `status` output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "todo_frontend_image_serve_total",
            Unit::Count,
            "Serve decisions by outcome (fresh, grace, refreshed, stale, unavailable)."
        );
        describe_counter!(
            "todo_frontend_image_fetch_total",
            Unit::Count,
            "Image fetch attempts by result."
        );
        describe_counter!(
            "todo_frontend_metadata_recovered_total",
            Unit::Count,
            "Metadata files reset to defaults because they were unreadable."
        );
        describe_counter!(
            "todo_frontend_metadata_write_failed_total",
            Unit::Count,
            "Metadata writes that failed and were skipped."
        );
    });
}
