//! HTTP API
//!
//! | Method   | Path            | Body / query                | Success                        |
//! |----------|-----------------|-----------------------------|--------------------------------|
//! | `POST`   | `/create`       | `{key, value, second}`      | 201 `{created: true, key}`     |
//! | `GET`    | `/get?key=`     |                             | 200 value as a JSON string     |
//! | `GET`    | `/`             |                             | 200 array of live records      |
//! | `DELETE` | `/delete?key=`  |                             | 200 `{deleted: true, key}`     |
//! | `GET`    | `/count`        |                             | 200 integer                    |
//!
//! Failures are JSON `{error}` bodies: 400 for a missing key or bad input,
//! 404 for unknown keys, 409 when creating a key that exists.

pub mod error;
pub mod routes;

use crate::storage::Store;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub use error::{ErrorBody, HttpError};
pub use routes::{CreateRequest, CreateResponse, DeleteResponse};

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<Store>,
}

/// Builds the API router over `store`.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/", get(routes::list_entries))
        .route("/create", post(routes::create_entry))
        .route("/get", get(routes::get_entry))
        .route("/delete", delete(routes::delete_entry))
        .route("/count", get(routes::count_entries))
        .with_state(AppState { store })
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, store: Arc<Store>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP API listening");
    }

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SnapshotRecord;
    use crate::storage::ManualClock;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json<T: DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn create(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/create")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let app = router(Arc::new(Store::new()));

        let body = r#"{"key": "orange", "value": "juice", "second": 5}"#;
        let response = send(&app, create(body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreateResponse = json(response).await;
        assert_eq!(
            created,
            CreateResponse {
                created: true,
                key: "orange".to_string()
            }
        );

        let response = send(&app, get_req("/get?key=orange")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value: String = json(response).await;
        assert_eq!(value, "juice");
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let store = Arc::new(Store::new());
        let app = router(Arc::clone(&store));

        send(&app, create(r#"{"key": "k", "value": "v1", "second": 5}"#)).await;
        let response = send(&app, create(r#"{"key": "k", "value": "v2", "second": 5}"#)).await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: ErrorBody = json(response).await;
        assert!(body.error.contains("already exists"));
        assert_eq!(store.get("k").unwrap(), bytes::Bytes::from("v1"));
    }

    #[tokio::test]
    async fn test_create_bad_requests() {
        let app = router(Arc::new(Store::new()));

        for body in [
            r#"{"value": "no key", "second": 5}"#,
            r#"{"key": "", "value": "v"}"#,
            r#"{"key": "k", "value": "v", "second": -1}"#,
            r#"{"key": "k", "value": "v", "second": "soon"}"#,
            "not json",
        ] {
            let response = send(&app, create(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        }

        let response = send(&app, get_req("/count")).await;
        let count: usize = json(response).await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_create_without_ttl_never_expires() {
        let store = Arc::new(Store::new());
        let app = router(Arc::clone(&store));

        let response = send(&app, create(r#"{"key": "k", "value": "v"}"#)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(store.get_entry("k").unwrap().expires_at, None);
    }

    #[tokio::test]
    async fn test_get_errors() {
        let app = router(Arc::new(Store::new()));

        assert_eq!(send(&app, get_req("/get")).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(send(&app, get_req("/get?key=")).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(send(&app, get_req("/get?key=nope")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_expired_is_not_found() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(Store::with_clock(clock.clone()));
        let app = router(Arc::clone(&store));

        store.create("k", "v", 2).unwrap();
        clock.advance(chrono::Duration::seconds(2));

        assert_eq!(send(&app, get_req("/get?key=k")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_returns_full_records() {
        let store = Arc::new(Store::new());
        store.create("b", "2", 60).unwrap();
        store.create("a", "1", 0).unwrap();
        let app = router(Arc::clone(&store));

        let response = send(&app, get_req("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let records: Vec<SnapshotRecord> = json(response).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[0].value, "1");
        assert_eq!(records[0].expires_at, None);
        assert_eq!(records[1].key, "b");
        assert!(records[1].expires_at.is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = Arc::new(Store::new());
        store.create("k", "v", 60).unwrap();
        let app = router(Arc::clone(&store));

        let response = send(&app, delete_req("/delete?key=k")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let deleted: DeleteResponse = json(response).await;
        assert!(deleted.deleted);

        assert_eq!(send(&app, delete_req("/delete?key=k")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(send(&app, delete_req("/delete")).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_count() {
        let store = Arc::new(Store::new());
        store.create("a", "1", 60).unwrap();
        store.create("b", "2", 60).unwrap();
        let app = router(store);

        let response = send(&app, get_req("/count")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let count: usize = json(response).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let app = router(Arc::new(Store::new()));

        let response = send(&app, get_req("/create")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = send(&app, get_req("/delete?key=k")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
