//! Password hashing, JWT issuing and the request authentication layer.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::api::{ApiError, SharedState};
use super::models::{User, UserRole, UserSummary};
use crate::config::PmoConfig;
use crate::errors::PmoError;

pub const MISSING_TOKEN: &str = "No authentication token provided";
pub const INVALID_TOKEN: &str = "Invalid authentication token";
pub const EXPIRED_TOKEN: &str = "Authentication token expired";
pub const UNKNOWN_USER: &str = "User not found";

/// JWT payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Token and hashing parameters resolved from configuration.
#[derive(Clone)]
pub struct AuthSettings {
    secret: String,
    token_ttl: Duration,
    bcrypt_cost: u32,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

impl AuthSettings {
    pub fn new(secret: impl Into<String>, token_ttl: Duration, bcrypt_cost: u32) -> Self {
        Self {
            secret: secret.into(),
            token_ttl,
            bcrypt_cost,
        }
    }

    pub fn from_config(config: &PmoConfig) -> Self {
        Self::new(
            config.toml.auth.jwt_secret.clone(),
            config.token_ttl(),
            config.toml.auth.bcrypt_cost,
        )
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let iat = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat,
            exp: iat.saturating_add(ttl),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to sign token")
    }

    /// Decode and check a token. Expiry is exact, without leeway.
    pub fn verify_token(&self, token: &str) -> Result<Claims, PmoError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => PmoError::Unauthorized(EXPIRED_TOKEN.into()),
            _ => PmoError::Unauthorized(INVALID_TOKEN.into()),
        })
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).context("Failed to hash password")
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// The authenticated caller, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserSummary);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn role(&self) -> UserRole {
        self.0.role
    }

    /// ADMIN or MANAGER.
    pub fn require_manager(&self) -> Result<(), PmoError> {
        if self.role().can_manage() {
            Ok(())
        } else {
            Err(PmoError::Forbidden(
                "Insufficient permissions, administrator or manager role required".into(),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), PmoError> {
        if self.role() == UserRole::Admin {
            Ok(())
        } else {
            Err(PmoError::Forbidden(
                "Insufficient permissions, administrator role required".into(),
            ))
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware: resolve the bearer token to a live user or reject with 401.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(&req) else {
        tracing::debug!("request without bearer token");
        return Err(PmoError::Unauthorized(MISSING_TOKEN.into()).into());
    };
    let claims = state.auth.verify_token(token).inspect_err(|err| {
        tracing::debug!(error = %err, "token rejected");
    })?;

    let user_id = claims.id.clone();
    let user = state
        .db
        .call(move |db| db.get_user(&user_id))
        .await?
        .ok_or_else(|| {
            tracing::debug!(user_id = %claims.id, "token for deleted user");
            PmoError::Unauthorized(UNKNOWN_USER.into())
        })?;

    req.extensions_mut()
        .insert(CurrentUser(UserSummary::from(&user)));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuthSettings {
        AuthSettings::new("test-secret", Duration::from_secs(3600), 4)
    }

    fn user(role: UserRole) -> User {
        User {
            id: "0b5c8f5e-3d0b-4c59-8d4c-1f6a3c2e9b71".into(),
            email: "pm@example.com".into(),
            password_hash: String::new(),
            name: "Pat".into(),
            role,
            department_id: None,
            company_id: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_token_round_trip_carries_claims() {
        let settings = settings();
        let token = settings.issue_token(&user(UserRole::Manager)).unwrap();
        let claims = settings.verify_token(&token).unwrap();
        assert_eq!(claims.email, "pm@example.com");
        assert_eq!(claims.role, UserRole::Manager);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_invalid() {
        let token = AuthSettings::new("other", Duration::from_secs(60), 4)
            .issue_token(&user(UserRole::Member))
            .unwrap();
        match settings().verify_token(&token) {
            Err(PmoError::Unauthorized(msg)) => assert_eq!(msg, INVALID_TOKEN),
            other => panic!("Expected invalid token, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_token_is_reported() {
        let settings = settings();
        let now = chrono::Utc::now().timestamp();
        let token = settings
            .encode(&Claims {
                id: "u1".into(),
                email: "pm@example.com".into(),
                role: UserRole::Member,
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        match settings.verify_token(&token) {
            Err(PmoError::Unauthorized(msg)) => assert_eq!(msg, EXPIRED_TOKEN),
            other => panic!("Expected expired token, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        assert!(matches!(
            settings().verify_token("not.a.jwt"),
            Err(PmoError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("secret1", 4).unwrap();
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("secret1", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_role_guards() {
        let admin = CurrentUser(UserSummary::from(&user(UserRole::Admin)));
        let manager = CurrentUser(UserSummary::from(&user(UserRole::Manager)));
        let member = CurrentUser(UserSummary::from(&user(UserRole::Member)));

        assert!(admin.require_manager().is_ok());
        assert!(admin.require_admin().is_ok());
        assert!(manager.require_manager().is_ok());
        assert!(matches!(manager.require_admin(), Err(PmoError::Forbidden(_))));
        assert!(matches!(member.require_manager(), Err(PmoError::Forbidden(_))));
    }
}
