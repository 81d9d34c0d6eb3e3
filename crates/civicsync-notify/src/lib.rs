//! Notification trigger endpoint.
//!
//! Delivery is switched off: a trigger only records a `notifications` row in
//! the sync status table and reports that nothing was sent. Every response,
//! the `OPTIONS` pre-flight included, carries permissive CORS headers.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info};

use civicsync_core::SyncStatus;
use civicsync_store::{StatusUpsert, StatusWriter};

/// Row id of the notifications job in the sync status table.
pub const STATUS_ID: &str = "notifications";

pub const DISABLED_MESSAGE: &str = "Email notifications are temporarily disabled";

const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Body of a successful trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    pub sent: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize)]
struct TriggerFailure {
    success: bool,
    error: String,
}

#[derive(Clone)]
struct NotifyState {
    writer: Arc<dyn StatusWriter>,
    message: Arc<str>,
}

/// Build the trigger router. Every path is served; `message` is reported
/// back and stored in the status row's metadata.
pub fn router(writer: Arc<dyn StatusWriter>, message: &str) -> Router {
    let state = NotifyState {
        writer,
        message: Arc::from(message),
    };
    Router::new()
        .route("/", any(dispatch))
        .route("/{*path}", any(dispatch))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .with_state(state)
}

/// Serve `router` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    serve_until(listener, router, tokio::signal::ctrl_c()).await
}

/// Serve `router` on `listener` until `signal` resolves with `Ok`. If the
/// signal cannot be listened for, the server keeps running.
pub async fn serve_until<F>(listener: TcpListener, router: Router, signal: F) -> std::io::Result<()>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "notification trigger listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            match signal.await {
                Ok(()) => info!("shutting down notification trigger"),
                Err(e) => {
                    error!(error = %e, "cannot listen for shutdown signal, serving until killed");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}

async fn dispatch(method: Method, state: State<NotifyState>) -> Response {
    if method == Method::OPTIONS {
        return "ok".into_response();
    }
    trigger(state).await
}

async fn trigger(State(state): State<NotifyState>) -> Response {
    let now = Utc::now();
    let row = StatusUpsert {
        id: STATUS_ID.to_string(),
        status: SyncStatus::Complete,
        last_synced_at: Some(now),
        last_run_at: Some(now),
        metadata: serde_json::json!({ "message": &*state.message }),
        error: None,
    };

    match state.writer.upsert_status(row).await {
        Ok(()) => {
            info!(message = %state.message, "notification trigger recorded, nothing sent");
            Json(TriggerResponse {
                success: true,
                message: state.message.to_string(),
                sent: 0,
                errors: 0,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to record notification trigger");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TriggerFailure {
                    success: false,
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use civicsync_store::MemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(app: Router, method: Method) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        send_to(app, method, "/").await
    }

    async fn send_to(
        app: Router,
        method: Method,
        uri: &str,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    fn assert_cors(headers: &axum::http::HeaderMap) {
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
    }

    #[tokio::test]
    async fn preflight_returns_ok_with_cors() {
        let store = Arc::new(MemoryStore::new());
        let (status, headers, body) = send(router(store.clone(), DISABLED_MESSAGE), Method::OPTIONS).await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(body, b"ok");
        assert!(store.upserts().await.is_empty(), "pre-flight must not write");
    }

    #[tokio::test]
    async fn trigger_records_status_and_reports_nothing_sent() {
        let store = Arc::new(MemoryStore::new());
        let (status, headers, body) = send(router(store.clone(), DISABLED_MESSAGE), Method::POST).await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);

        let parsed: TriggerResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed,
            TriggerResponse {
                success: true,
                message: DISABLED_MESSAGE.into(),
                sent: 0,
                errors: 0,
            }
        );

        let upserts = store.upserts().await;
        assert_eq!(upserts.len(), 1);
        let row = &upserts[0];
        assert_eq!(row.id, STATUS_ID);
        assert_eq!(row.status, SyncStatus::Complete);
        assert!(row.last_synced_at.is_some());
        assert_eq!(row.last_synced_at, row.last_run_at);
        assert_eq!(row.metadata["message"], DISABLED_MESSAGE);
        assert_eq!(row.error, None);
    }

    #[tokio::test]
    async fn any_method_triggers() {
        let store = Arc::new(MemoryStore::new());
        let (status, _, _) = send(router(store.clone(), "off"), Method::GET).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.upserts().await.len(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_500_with_cors() {
        let store = Arc::new(MemoryStore::new());
        store.set_failure(Some("service role key missing")).await;
        let (status, headers, body) = send(router(store, DISABLED_MESSAGE), Method::POST).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(&headers);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("service role key missing"));
    }

    #[tokio::test]
    async fn every_path_is_served() {
        let store = Arc::new(MemoryStore::new());
        let app = router(store.clone(), DISABLED_MESSAGE);

        let (status, headers, body) =
            send_to(app.clone(), Method::OPTIONS, "/functions/v1/notify").await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(body, b"ok");

        for uri in ["/notify-trigger", "/functions/v1/notify", "/?x=1"] {
            let (status, headers, body) = send_to(app.clone(), Method::POST, uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_cors(&headers);
            let parsed: TriggerResponse = serde_json::from_slice(&body).unwrap();
            assert!(parsed.success);
        }
        assert_eq!(store.upserts().await.len(), 3);
    }

    async fn local_listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn shutdown_signal_stops_server() {
        let app = router(Arc::new(MemoryStore::new()), DISABLED_MESSAGE);
        let served = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            serve_until(local_listener().await, app, async { Ok(()) }),
        )
        .await
        .expect("server should stop once the signal fires");
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn failed_shutdown_signal_keeps_serving() {
        let app = router(Arc::new(MemoryStore::new()), DISABLED_MESSAGE);
        let server = tokio::spawn(serve_until(local_listener().await, app, async {
            Err(std::io::Error::other("signal handler unavailable"))
        }));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!server.is_finished());
        server.abort();
    }
}
