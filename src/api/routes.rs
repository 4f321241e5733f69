//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    delete_handler, flush_handler, get_handler, head_handler, health_handler, keys_handler,
    set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// Keys may contain slashes; everything after `/cache/` is the key.
/// The request body limit is enforced by the PUT handler against the
/// configured value size instead of axum's default.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/cache/*key",
            get(get_handler)
                .head(head_handler)
                .put(set_handler)
                .delete(delete_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/keys", get(keys_handler))
        .route("/flush", post(flush_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskCache;
    use crate::config::StoreConfig;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn create_test_app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(StoreConfig::new(dir.path())).unwrap();
        (dir, create_router(AppState::new(cache)))
    }

    fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, app) = create_test_app();

        let response = app
            .oneshot(request("GET", "/health", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (_dir, app) = create_test_app();

        let response = app
            .oneshot(request("GET", "/stats", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_put_then_get_nested_key() {
        let (_dir, app) = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/cache/images/logo.png")
                    .header(header::CONTENT_TYPE, "image/png")
                    .body(Body::from("png bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(request("GET", "/cache/images/logo.png", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"png bytes");
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let (_dir, app) = create_test_app();

        let response = app
            .oneshot(request("GET", "/cache/nonexistent", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_endpoint() {
        let (_dir, app) = create_test_app();

        let response = app
            .clone()
            .oneshot(request("HEAD", "/cache/missing", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(request("PUT", "/cache/present", Body::from("v")))
            .await
            .unwrap();
        let response = app
            .oneshot(request("HEAD", "/cache/present", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_put_headers_replayed_on_get() {
        let (_dir, app) = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/cache/page")
                    .header("x-diskcache-expire", "60")
                    .header("x-set-cache-control", "public, max-age=60")
                    .header(header::CACHE_CONTROL, "no-store")
                    .body(Body::from("<html/>"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/cache/page", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=60");
        assert!(headers.contains_key(header::EXPIRES));
        assert!(headers[header::LAST_MODIFIED].to_str().unwrap().ends_with(" GMT"));
    }

    #[tokio::test]
    async fn test_expire_header_must_be_numeric() {
        let (_dir, app) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/cache/k")
                    .header("x-diskcache-expire", "tomorrow")
                    .body(Body::from("v"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_flush_endpoint() {
        let (_dir, app) = create_test_app();
        app.clone()
            .oneshot(request("PUT", "/cache/a", Body::from("1")))
            .await
            .unwrap();

        let response = app
            .oneshot(request("POST", "/flush", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["removed"], 1);
    }
}
