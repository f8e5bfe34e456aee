//! REST API: shared state, error mapping, response envelopes and the router.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::{Deserialize, Serialize};

use super::auth::{AuthSettings, require_auth};
use super::db::{DbHandle, constraint_violation};
use super::models::SearchFilter;
use crate::errors::{FieldError, PmoError};

mod auth;
mod companies;
mod dashboard;
mod departments;
mod issues;
mod plans;
mod projects;
mod systems;
mod users;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub auth: AuthSettings,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Validation(Vec<FieldError>),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, errors) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str(), None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str(), None),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                errors.first().map_or("Validation failed", |e| e.message.as_str()),
                Some(errors.as_slice()),
            ),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.as_str(), None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.as_str(), None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.as_str(), None),
        };
        let error = match &self {
            ApiError::Validation(_) => "Validation failed",
            _ => message,
        };
        let body = ErrorBody {
            success: false,
            error,
            message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}

impl ApiError {
    fn internal() -> Self {
        ApiError::Internal("Internal server error".into())
    }

    /// Map a domain error found by reference inside an error chain.
    fn from_domain(err: &PmoError) -> Option<Self> {
        Some(match err {
            PmoError::NotFound { entity, .. } => ApiError::NotFound(format!("{} not found", entity)),
            PmoError::Conflict(msg) | PmoError::BadRequest(msg) => ApiError::BadRequest(msg.clone()),
            PmoError::Validation(errors) => ApiError::Validation(errors.clone()),
            PmoError::Unauthorized(msg) => ApiError::Unauthorized(msg.clone()),
            PmoError::Forbidden(msg) => ApiError::Forbidden(msg.clone()),
            PmoError::InvalidCredentials => ApiError::BadRequest(err.to_string()),
            PmoError::LockPoisoned | PmoError::Other(_) => return None,
        })
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(domain) = cause.downcast_ref::<PmoError>()
                && let Some(api) = ApiError::from_domain(domain)
            {
                return api;
            }
            if let Some(sqlite) = cause.downcast_ref::<rusqlite::Error>()
                && let Some(violation) = constraint_violation(sqlite)
                && let Some(api) = ApiError::from_domain(&violation)
            {
                return api;
            }
        }
        tracing::error!(error = ?err, "request failed");
        ApiError::internal()
    }
}

impl From<PmoError> for ApiError {
    fn from(err: PmoError) -> Self {
        match err {
            PmoError::Other(inner) => ApiError::from(inner),
            other => ApiError::from_domain(&other).unwrap_or_else(|| {
                tracing::error!(error = %other, "request failed");
                ApiError::internal()
            }),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Extractors and envelopes ──────────────────────────────────────────

/// `Json` whose rejections use the API error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `{"success": true, "data": ..., "message"?: ...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn envelope<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        message: None,
    })
}

pub fn envelope_with<T: Serialize>(data: T, message: &str) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        message: Some(message.to_string()),
    })
}

/// `?status=&search=` on list routes. Blank values are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub status: Option<String>,
    pub search: Option<String>,
}

impl From<SearchQuery> for SearchFilter {
    fn from(q: SearchQuery) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        SearchFilter {
            status: non_blank(q.status),
            search: non_blank(q.search),
        }
    }
}

/// The `{message}` body returned by resource-style deletes.
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

pub fn message(text: &str) -> Json<MessageBody> {
    Json(MessageBody {
        message: text.to_string(),
    })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(state: SharedState) -> Router {
    let protected = Router::new()
        .merge(auth::protected_routes())
        .merge(users::routes())
        .merge(projects::routes())
        .merge(plans::routes())
        .merge(issues::routes())
        .merge(departments::routes())
        .merge(companies::routes())
        .merge(systems::routes())
        .merge(dashboard::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/api", get(api_index))
        .merge(auth::public_routes())
        .merge(protected)
        .route("/api/{*rest}", any(api_not_found))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn api_index() -> Json<MessageBody> {
    message("PMO toolbox API running")
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound("API route not found".into())
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::test_util::TestApp;
    use super::*;
    use crate::office::models::UserRole;

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new();
        let (status, body) = app.request("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("ok"));
    }

    #[tokio::test]
    async fn test_api_index_is_public() {
        let app = TestApp::new();
        let (status, body) = app.request("GET", "/api", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "PMO toolbox API running");
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let app = TestApp::new();
        let (status, body) = app.request("GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No authentication token provided");
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected() {
        let app = TestApp::new();
        let (status, body) = app
            .request("GET", "/api/projects", Some("garbage"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid authentication token");
    }

    #[tokio::test]
    async fn test_token_for_deleted_user() {
        let app = TestApp::new();
        let user = crate::office::models::User {
            id: "4d9c1b7e-52a8-4f0c-9e57-0c3c2f1a7b10".into(),
            email: "ghost@example.com".into(),
            password_hash: String::new(),
            name: "Ghost".into(),
            role: UserRole::Admin,
            department_id: None,
            company_id: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let token = app.state.auth.issue_token(&user).unwrap();
        let (status, body) = app.get("/api/projects", &token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn test_unknown_api_route_is_json_404() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let (status, body) = app.get("/api/nope", &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_bad_request() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let (status, body) = app
            .post("/api/companies", &token, json!({"name": 42}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[test]
    fn test_anyhow_chain_maps_domain_errors() {
        let err = anyhow::Error::from(PmoError::not_found("Project", "p1")).context("loading");
        assert!(matches!(ApiError::from(err), ApiError::NotFound(msg) if msg == "Project not found"));

        let err = anyhow::anyhow!("disk on fire");
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
    }

    #[test]
    fn test_validation_body_lists_fields() {
        let response = ApiError::Validation(vec![FieldError::new("email", "Please provide a valid email")])
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
