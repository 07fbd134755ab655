//! HTTP status endpoint.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, routing::get};
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::protocol::StatusReport;

/// Status server error.
#[derive(Debug, Error)]
pub enum StatusServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Status server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Something that can describe the bot's current status.
///
/// Implementations read published snapshots only; they must not block.
pub trait StatusSource: Send + Sync + 'static {
    fn report(&self) -> StatusReport;
}

async fn status_handler(State(source): State<Arc<dyn StatusSource>>) -> Json<StatusReport> {
    Json(source.report())
}

/// Router answering `GET /` and `GET /status`.
#[must_use]
pub fn status_router(source: Arc<dyn StatusSource>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(source)
}

/// Serve `router` on `addr` until `shutdown` resolves.
///
/// # Errors
/// Returns error if the address cannot be bound or the server fails.
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<(), StatusServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StatusServerError::Bind { addr, source })?;
    tracing::info!("Status endpoint listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StatusServerError::Serve)?;

    tracing::info!("Status endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use durand_session::{SupervisorState, SupervisorStatus};
    use tower::ServiceExt;

    use super::*;

    struct Fixed;

    impl StatusSource for Fixed {
        fn report(&self) -> StatusReport {
            let now = Utc::now();
            StatusReport::new(
                now,
                now,
                3,
                SupervisorStatus {
                    state: SupervisorState::Reconnecting,
                    retry_count: 2,
                    connected: false,
                },
            )
        }
    }

    async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
        let response = status_router(Arc::new(Fixed))
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_root_and_status_paths() {
        for path in ["/", "/status"] {
            let (status, json) = get_json(path).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["commandCount"], 3);
            assert_eq!(json["retryCount"], 2);
            assert_eq!(json["connected"], false);
            assert_eq!(json["state"], "reconnecting");
            assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get_json("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let result = serve(addr, status_router(Arc::new(Fixed)), async {}).await;
        tokio_test::assert_ok!(result);
    }
}
