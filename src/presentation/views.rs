use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::{application::{error::HttpError, serve::ServeResult}, config::SiteSettings};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
const MISSING: &str = "N/A";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Display-ready values for the landing page.
#[derive(Debug, Clone)]
pub struct IndexView {
    pub namespace: String,
    pub todo_api_path: String,
    pub image_available: bool,
    pub downloaded_at: String,
    pub expires_at: String,
    pub last_access: String,
    pub access_count: u64,
    pub image_access_count: u64,
    pub status_label: &'static str,
    pub ttl_seconds: u64,
}

impl IndexView {
    pub fn new(result: &ServeResult, site: &SiteSettings) -> Self {
        let snapshot = &result.snapshot;
        let metadata = &snapshot.metadata;

        Self {
            namespace: site.namespace.clone(),
            todo_api_path: site.todo_api_path(),
            image_available: result.outcome.has_image() && snapshot.artifact_present,
            downloaded_at: format_timestamp(metadata.download_timestamp),
            expires_at: format_timestamp(snapshot.expires_at),
            last_access: format_timestamp(metadata.last_access_time),
            access_count: metadata.access_count,
            image_access_count: metadata.image_access_count,
            status_label: snapshot.status.label(),
            ttl_seconds: snapshot.ttl_seconds,
        }
    }
}

fn format_timestamp(value: Option<OffsetDateTime>) -> String {
    value
        .and_then(|ts| ts.format(TIMESTAMP_FORMAT).ok())
        .unwrap_or_else(|| MISSING.to_string())
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: IndexView,
}
