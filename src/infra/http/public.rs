use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde_json::json;
use tracing::error;

use crate::{
    application::{error::HttpError, serve::ImageService},
    config::SiteSettings,
    infra::assets,
    presentation::views::{IndexTemplate, IndexView, render_template_response},
};

use super::middleware::{log_responses, set_request_context};

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Clone)]
pub struct HttpState {
    pub images: ImageService,
    pub site: Arc<SiteSettings>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/image", get(image))
        .route("/healthz", get(healthz))
        .route("/static/{*path}", get(assets::serve_static))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>) -> Response {
    let result = state.images.serve().await;
    let view = IndexView::new(&result, &state.site);
    render_template_response(IndexTemplate { view }, StatusCode::OK)
}

async fn image(State(state): State<HttpState>) -> Response {
    const SOURCE: &str = "infra::http::public::image";

    match state.images.cache().read_artifact().await {
        Ok(Some(bytes)) => build_image_response(bytes),
        Ok(None) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Image not available",
            "no cached image on disk",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = SOURCE,
                error = %err,
                "failed to read cached image"
            );
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read cached image",
                &err,
            )
            .into_response()
        }
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

fn build_image_response(bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(IMAGE_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
