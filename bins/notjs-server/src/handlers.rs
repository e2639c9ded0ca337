// HTTP route handlers for the NotJS server

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use notjs_common::ToolchainError;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultVersionResponse {
    pub language: String,
    pub default_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfoResponse {
    pub language: String,
    pub available_versions: Vec<String>,
    pub default_version: String,
}

fn not_found(e: ToolchainError) -> axum::response::Response {
    debug!(error = %e, "Language lookup failed");
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": e.to_string()
        })),
    )
        .into_response()
}

/// GET /status - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            active_sessions: state.sessions.active_sessions(),
        }),
    )
}

/// GET /api/language/supported - Sorted language ids
pub async fn supported_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.registry.list_languages()))
}

/// GET /api/language/version/:language - Versions of one language
pub async fn language_versions(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> impl IntoResponse {
    match state.registry.describe(&language) {
        Ok(descriptor) => (StatusCode::OK, Json(descriptor.available_versions())).into_response(),
        Err(e) => not_found(e),
    }
}

/// GET /api/language/version/:language/default
pub async fn default_version(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> impl IntoResponse {
    match state.registry.describe(&language) {
        Ok(descriptor) => (
            StatusCode::OK,
            Json(DefaultVersionResponse {
                language: descriptor.language.clone(),
                default_version: descriptor.default_version.clone(),
            }),
        )
            .into_response(),
        Err(e) => not_found(e),
    }
}

/// GET /api/language/info/:language
pub async fn language_info(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> impl IntoResponse {
    match state.registry.describe(&language) {
        Ok(descriptor) => (
            StatusCode::OK,
            Json(LanguageInfoResponse {
                language: descriptor.language.clone(),
                available_versions: descriptor.available_versions(),
                default_version: descriptor.default_version.clone(),
            }),
        )
            .into_response(),
        Err(e) => not_found(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::executor::test_support::{context, fake_registry};
    use crate::executor::ExecutorSet;
    use crate::routes;
    use crate::session::SessionManager;
    use crate::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(tmp: &std::path::Path) -> axum::Router {
        let registry = Arc::new(fake_registry(tmp));
        let executors = Arc::new(ExecutorSet::from_registry(&registry, context(tmp)).unwrap());
        let state = Arc::new(AppState {
            registry: registry.clone(),
            sessions: SessionManager::new(registry, executors, 1024),
        });
        routes::routes().with_state(state)
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get(app(tmp.path()), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok", "active_sessions": 0}));
    }

    #[tokio::test]
    async fn test_supported_languages_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get(app(tmp.path()), "/api/language/supported").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["c", "cpp", "go", "java", "rust"]));
    }

    #[tokio::test]
    async fn test_versions_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get(app(tmp.path()), "/api/language/version/CPP").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["98", "11", "14", "17", "20", "23"]));
    }

    #[tokio::test]
    async fn test_default_and_info() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get(app(tmp.path()), "/api/language/version/go/default").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"language": "go", "defaultVersion": "1.21"}));

        let (status, body) = get(app(tmp.path()), "/api/language/info/java").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["defaultVersion"], "25");
        assert_eq!(body["availableVersions"], serde_json::json!(["8", "11", "17", "21", "25"]));
    }

    #[tokio::test]
    async fn test_unknown_language_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        for uri in [
            "/api/language/version/python",
            "/api/language/version/python/default",
            "/api/language/info/python",
        ] {
            let (status, body) = get(app(tmp.path()), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert!(body["error"].as_str().unwrap().contains("python"));
        }
    }
}
