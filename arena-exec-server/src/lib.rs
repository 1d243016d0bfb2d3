use arena_exec::{
    ExecutionRequest, ExecutionResult, ExecutionService, Language, LimitsConfig, ServiceConfig,
    Verdict,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unsupported language: {0}")]
    InvalidLanguage(String),
    #[error(transparent)]
    Execution(#[from] arena_exec::Error),
    #[error("Server error: {0}")]
    Server(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        use arena_exec::Error;
        let (status, verdict, message) = match &self {
            ServerError::InvalidLanguage(_) => {
                (StatusCode::BAD_REQUEST, Verdict::InternalError, self.to_string())
            }
            ServerError::Execution(Error::UnsupportedLanguage(_))
            | ServerError::Execution(Error::Validation(_)) => {
                (StatusCode::BAD_REQUEST, Verdict::InternalError, self.to_string())
            }
            ServerError::Execution(Error::Busy(_)) => (
                StatusCode::TOO_MANY_REQUESTS,
                Verdict::ServiceBusy,
                Verdict::ServiceBusy.message().to_string(),
            ),
            // The Display of Error::Internal is already the generic message
            // plus a correlation id; no internal detail reaches the client.
            ServerError::Execution(Error::Internal { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Verdict::InternalError, self.to_string())
            }
            ServerError::Execution(_) | ServerError::Server(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Verdict::InternalError,
                Verdict::InternalError.message().to_string(),
            ),
        };

        (
            status,
            Json(json!({ "success": false, "error": message, "verdict": verdict })),
        )
            .into_response()
    }
}

/// Body the IDE page posts to `/execute`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,
    pub input: Option<String>,
}

/// Superset of the original `{success, output, error, exit_code}` contract.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub verdict: Verdict,
    pub duration_ms: u64,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        // Failed runs with a silent stderr still get a readable message
        let error = if !result.success && result.stderr.is_empty() {
            result.verdict.message().to_string()
        } else {
            result.stderr
        };
        Self {
            success: result.success,
            output: result.stdout,
            error,
            exit_code: result.exit_code,
            verdict: result.verdict,
            duration_ms: result.duration_ms,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<ExecutionService>,
}

pub fn create_app(config: ServiceConfig, limits: LimitsConfig) -> Router {
    let service = ExecutionService::new(config, limits);

    let available = service.registry().available();
    if available.is_empty() {
        warn!("no language toolchains found on PATH; every execution will fail");
    } else {
        info!(?available, "language toolchains detected");
    }

    let state = AppState {
        service: Arc::new(service),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting arena execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "available_slots": state.service.available_slots(),
    }))
}

async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ServerError> {
    let language: Language = payload
        .language
        .parse()
        .map_err(|_| ServerError::InvalidLanguage(payload.language.clone()))?;

    let request = ExecutionRequest {
        language,
        code: payload.code,
        stdin: payload.input.unwrap_or_default(),
    };

    let result = state.service.execute(request).await?;
    Ok(Json(ExecuteResponse::from(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn app() -> Router {
        create_app(ServiceConfig::default(), LimitsConfig::default())
    }

    fn post_execute(body: &ExecuteRequest) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_check_reports_free_slots() {
        let config = ServiceConfig {
            max_concurrent: 4,
            ..ServiceConfig::default()
        };
        let response = create_app(config, LimitsConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["available_slots"], 4);
    }

    #[tokio::test]
    async fn unknown_language_is_a_bad_request() {
        let request = ExecuteRequest {
            language: "brainfuck".to_string(),
            code: "+".to_string(),
            input: None,
        };
        let response = app().oneshot(post_execute(&request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("brainfuck"));
    }

    #[tokio::test]
    async fn empty_code_is_a_bad_request() {
        let request = ExecuteRequest {
            language: "python".to_string(),
            code: String::new(),
            input: None,
        };
        let response = app().oneshot(post_execute(&request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[ignore = "requires python3 on the host"]
    async fn python_round_trip() {
        let request = ExecuteRequest {
            language: "python".to_string(),
            code: "print(1+1)".to_string(),
            input: None,
        };
        let response = app().oneshot(post_execute(&request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: ExecuteResponse = serde_json::from_slice(&body).unwrap();
        assert!(result.success);
        assert_eq!(result.output, "2\n");
        assert_eq!(result.verdict, Verdict::Ok);
    }
}
