use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tempfile::TempDir;
use todo_frontend::application::serve::ImageService;
use todo_frontend::application::source::{FetchError, ImageSource};
use todo_frontend::cache::{CacheConfig, ImageCache};
use todo_frontend::config::SiteSettings;
use todo_frontend::infra::http::{HttpState, RequestContext, build_router};
use tower::ServiceExt;

const IMAGE: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg";

struct StaticSource {
    available: AtomicBool,
}

#[async_trait]
impl ImageSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> Result<Bytes, FetchError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(Bytes::from_static(IMAGE))
        } else {
            Err(FetchError::transport("connection refused"))
        }
    }
}

fn app(dir: &TempDir, available: bool) -> (Router, ImageService) {
    let config = CacheConfig::new(dir.path(), Duration::from_secs(600));
    let cache = Arc::new(ImageCache::open(config).expect("cache should open"));
    let source = Arc::new(StaticSource {
        available: AtomicBool::new(available),
    });
    let images = ImageService::new(cache, source);
    let state = HttpState {
        images: images.clone(),
        site: Arc::new(SiteSettings {
            namespace: "project".to_string(),
        }),
    };
    (build_router(state), images)
}

async fn get(router: &Router, path: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router should respond")
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
}

#[tokio::test]
async fn healthz_reports_ready_without_touching_cache() {
    let dir = TempDir::new().expect("temp dir");
    let (router, images) = app(&dir, false);

    let response = get(&router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.extensions().get::<RequestContext>().is_some());

    let body: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).expect("json body");
    assert_eq!(body, serde_json::json!({ "status": "ready" }));
    assert_eq!(images.cache().snapshot().metadata.access_count, 0);
}

#[tokio::test]
async fn image_is_missing_before_first_fetch() {
    let dir = TempDir::new().expect("temp dir");
    let (router, _) = app(&dir, true);

    let response = get(&router, "/image").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn index_fetches_and_image_serves_jpeg() {
    let dir = TempDir::new().expect("temp dir");
    let (router, images) = app(&dir, true);

    let page = get(&router, "/").await;
    assert_eq!(page.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(page).await.to_vec()).expect("utf8");
    assert!(html.contains("project") && html.contains("todos"));
    assert!(html.contains("Valid"));
    assert!(html.contains("src=\"/image\""));

    let image = get(&router, "/image").await;
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(
        image.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"image/jpeg"[..])
    );
    assert_eq!(
        image.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
        Some(&b"no-store"[..])
    );
    assert_eq!(body_bytes(image).await.as_ref(), IMAGE);

    let metadata = images.cache().snapshot().metadata;
    assert_eq!(metadata.access_count, 1, "/image does not count as an access");
    assert_eq!(metadata.image_access_count, 1);
}

#[tokio::test]
async fn index_renders_notice_when_source_is_down() {
    let dir = TempDir::new().expect("temp dir");
    let (router, images) = app(&dir, false);

    let page = get(&router, "/").await;
    assert_eq!(page.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(page).await.to_vec()).expect("utf8");
    assert!(html.contains("Image unavailable"));
    assert!(html.contains("N/A"));
    assert!(html.contains("Expired"));
    assert_eq!(images.cache().snapshot().metadata.access_count, 1);
}

#[tokio::test]
async fn index_loads_the_todo_client() {
    let dir = TempDir::new().expect("temp dir");
    let (router, _) = app(&dir, true);

    let page = get(&router, "/").await;
    let html = String::from_utf8(body_bytes(page).await.to_vec()).expect("utf8");
    assert!(html.contains("src=\"/static/scripts.js\""));
    assert!(html.contains("data-todo-api=\""));
    assert!(html.contains("id=\"todoList\"") && html.contains("id=\"doneList\""));
    assert!(html.contains("id=\"todoInput\"") && html.contains("id=\"createTodoButton\""));
}

#[tokio::test]
async fn todo_client_script_is_served() {
    let dir = TempDir::new().expect("temp dir");
    let (router, images) = app(&dir, true);

    let response = get(&router, "/static/scripts.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("javascript"), "got {content_type}");

    let script = String::from_utf8(body_bytes(response).await.to_vec()).expect("utf8");
    assert!(script.contains("dataset.todoApi"));
    assert!(script.contains("'POST'") && script.contains("'PUT'"));
    assert!(script.contains("completed: true"));
    assert_eq!(images.cache().snapshot().metadata.access_count, 0);
}

#[tokio::test]
async fn unknown_static_paths_are_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let (router, _) = app(&dir, true);

    for path in ["/static/missing.js", "/static/../Cargo.toml", "/static/%2E%2E/Cargo.toml"] {
        let response = get(&router, path).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}
