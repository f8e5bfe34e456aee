use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, SharedState};
use crate::errors::PmoError;
use crate::office::auth::{CurrentUser, hash_password, verify_password};
use crate::office::db::NewUser;
use crate::office::models::{User, UserRole, UserSummary};
use crate::office::validate::Validator;

pub(super) fn public_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

pub(super) fn protected_routes() -> Router<SharedState> {
    Router::new().route("/api/auth/me", get(me))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
    role: Option<String>,
    department_id: Option<String>,
    company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    message: &'static str,
    token: String,
    user: UserSummary,
}

async fn register(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let email = v.email("email", req.email.as_deref(), "Please provide a valid email");
    let password = v.min_len(
        "password",
        req.password.as_deref(),
        6,
        "Password must be at least 6 characters",
    );
    let name = v.required("name", req.name.as_deref(), "Name is required");
    let role: Option<UserRole> = v.parse_enum("role", req.role.as_deref());
    v.finish()?;
    let (Some(email), Some(password), Some(name)) = (email, password, name) else {
        return Err(PmoError::invalid("email", "Please provide a valid email").into());
    };

    let cost = state.auth.bcrypt_cost();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .context("Password hashing task panicked")??;

    let new = NewUser {
        email,
        password_hash,
        name,
        role: role.unwrap_or_default(),
        department_id: req.department_id.filter(|s| !s.is_empty()),
        company_id: req.company_id.filter(|s| !s.is_empty()),
    };
    let user = state.db.call(move |db| db.create_user(new)).await?;
    tracing::info!(user_id = %user.id, role = %user.role, "user registered");

    let token = state.auth.issue_token(&user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            token,
            user: UserSummary::from(&user),
        }),
    ))
}

async fn login(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let mut v = Validator::new();
    let email = v.email("email", req.email.as_deref(), "Please provide a valid email");
    let password = v.required("password", req.password.as_deref(), "Password is required");
    v.finish()?;
    let (Some(email), Some(_)) = (email, password) else {
        return Err(PmoError::InvalidCredentials.into());
    };
    // `required` trims; the hash is checked against the raw password.
    let password = req.password.unwrap_or_default();

    let user: Option<User> = state
        .db
        .call(move |db| db.find_user_by_email(&email))
        .await?;
    let Some(user) = user else {
        tracing::debug!("login for unknown email");
        return Err(PmoError::InvalidCredentials.into());
    };

    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("Password check task panicked")?;
    if !matches {
        tracing::debug!(user_id = %user.id, "login with wrong password");
        return Err(PmoError::InvalidCredentials.into());
    }

    let token = state.auth.issue_token(&user)?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        message: "Login successful",
        token,
        user: UserSummary::from(&user),
    }))
}

async fn me(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<User>, ApiError> {
    let id = current.id().to_string();
    let user = state
        .db
        .call(move |db| {
            let user = db.get_user(&id)?;
            user.ok_or_else(|| PmoError::not_found("User", id).into())
        })
        .await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_util::TestApp;

    #[tokio::test]
    async fn test_register_login_me() {
        let app = TestApp::new();
        let (status, body) = app
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": "Ada@Example.com", "password": "secret1", "name": "Ada"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "ada@example.com");
        assert_eq!(body["user"]["role"], "MEMBER");
        assert!(body["user"].get("passwordHash").is_none());

        let (status, body) = app
            .request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "ada@example.com", "password": "secret1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = app.get("/api/auth/me", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ada");
    }

    #[tokio::test]
    async fn test_register_validation_collects_all_fields() {
        let app = TestApp::new();
        let (status, body) = app
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": "not-an-email", "password": "123"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<_> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(fields, ["email", "password", "name"]);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let app = TestApp::new();
        let payload = json!({"email": "ada@example.com", "password": "secret1", "name": "Ada"});
        app.request("POST", "/api/auth/register", None, Some(payload.clone()))
            .await;
        let (status, body) = app
            .request("POST", "/api/auth/register", None, Some(payload))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email already registered");
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let app = TestApp::new();
        app.request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "ada@example.com", "password": "secret1", "name": "Ada"})),
        )
        .await;

        for payload in [
            json!({"email": "ada@example.com", "password": "wrong-pass"}),
            json!({"email": "nobody@example.com", "password": "secret1"}),
        ] {
            let (status, body) = app
                .request("POST", "/api/auth/login", None, Some(payload))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Invalid credentials");
        }
    }

    #[tokio::test]
    async fn test_register_with_role() {
        let app = TestApp::new();
        let (status, body) = app
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": "boss@example.com", "password": "secret1", "name": "Boss", "role": "MANAGER"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "MANAGER");

        let (status, _) = app
            .request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": "x@example.com", "password": "secret1", "name": "X", "role": "OWNER"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
