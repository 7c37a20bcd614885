use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use execution::{ErrorKind, ExecError};
use shared_types::ErrorBody;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
}

/// POST /invoke — forward the body to a worker and return its result
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let cancel = CancellationToken::new();
    // A client that goes away drops this future; the guard cancels any wait
    // for a free worker along with it.
    let _guard = cancel.clone().drop_guard();
    let data = state.dispatcher.send(&payload, &cancel).await?;
    Ok(Json(data))
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /status — dispatcher counters
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dispatcher.status())
}

#[derive(Debug)]
pub struct ApiError(ExecError);

impl From<ExecError> for ApiError {
    fn from(e: ExecError) -> Self {
        Self(e)
    }
}

/// Client closed request (nginx convention)
const CLIENT_CLOSED: u16 = 499;

pub fn status_for(err: &ExecError) -> StatusCode {
    match err.kind() {
        ErrorKind::Config | ErrorKind::Lifecycle => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Spawn | ErrorKind::Protocol | ErrorKind::Transport | ErrorKind::Teardown => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Timeout => match err.root() {
            ExecError::Cancelled => {
                StatusCode::from_u16(CLIENT_CLOSED).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            _ => StatusCode::GATEWAY_TIMEOUT,
        },
        ErrorKind::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let label = self.0.as_label();
        if status.is_server_error() {
            match self.0.kind() {
                ErrorKind::Timeout | ErrorKind::ShutDown => {
                    warn!(error = %self.0, kind = label, "invoke failed")
                }
                _ => error!(error = %self.0, kind = label, "invoke failed"),
            }
        } else {
            debug!(error = %self.0, kind = label, "invoke abandoned");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
            kind: label.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use execution::{
        build_dispatcher, DispatcherConfig, ExecutionConfig, IoMode, StartSpec, SupervisorConfig,
    };

    fn app(worker: SupervisorConfig) -> (Router, Arc<AppState>) {
        let config = ExecutionConfig {
            worker,
            dispatcher: DispatcherConfig::default(),
        };
        let state = Arc::new(AppState {
            dispatcher: build_dispatcher(&config).expect("valid config"),
        });
        (router().with_state(Arc::clone(&state)), state)
    }

    async fn json_response(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("request failed");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();
        let value: Value = serde_json::from_slice(&body).expect("invalid JSON response");
        (status, value)
    }

    fn invoke_request(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_returns_worker_result() {
        let (app, state) = app(SupervisorConfig::new(IoMode::Stdio, StartSpec::new("cat")));

        let (status, body) = json_response(&app, invoke_request(&json!({"x": [1, 2]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"x": [1, 2]}));

        state.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_spawn_failure_is_bad_gateway() {
        let (app, state) = app(SupervisorConfig::new(
            IoMode::Stdio,
            StartSpec::new("/nonexistent/worker"),
        ));

        let (status, body) = json_response(&app, invoke_request(&json!(1))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "spawn_failed");
        assert!(body["error"].as_str().unwrap().contains("/nonexistent/worker"));

        state.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_after_shutdown_is_unavailable() {
        let (app, state) = app(SupervisorConfig::new(IoMode::Stdio, StartSpec::new("cat")));
        state.dispatcher.shutdown().await.unwrap();

        let (status, body) = json_response(&app, invoke_request(&json!(1))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "shut_down");
    }

    #[tokio::test]
    async fn test_healthz_and_status() {
        let (app, state) = app(SupervisorConfig::new(IoMode::Stdio, StartSpec::new("cat")));

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let (status, body) = json_response(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        json_response(&app, invoke_request(&json!("warm"))).await;
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let (status, body) = json_response(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategy"], "pooled");
        assert_eq!(body["max_workers"], 4);
        assert_eq!(body["sends"], 1);

        state.dispatcher.shutdown().await.unwrap();
    }

    #[test]
    fn test_status_mapping() {
        use std::time::Duration;

        let cases = [
            (ExecError::InvalidPersistentFileIo, 500),
            (ExecError::NotStarted, 500),
            (ExecError::Protocol("bad".into()), 502),
            (ExecError::Transport("refused".into()), 502),
            (ExecError::Timeout(Duration::from_secs(1)).teardown(), 502),
            (ExecError::Timeout(Duration::from_secs(1)), 504),
            (ExecError::Cancelled, 499),
            (ExecError::ShutDown, 503),
        ];
        for (err, code) in cases {
            assert_eq!(status_for(&err).as_u16(), code, "{err}");
        }
    }
}
