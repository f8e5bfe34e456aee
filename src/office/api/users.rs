use axum::{Json, Router, extract::State, routing::get};

use super::{ApiError, Envelope, SharedState, envelope};
use crate::office::models::UserListItem;

pub(super) fn routes() -> Router<SharedState> {
    Router::new().route("/api/users", get(list_users))
}

/// Member and assignee pickers.
async fn list_users(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<Vec<UserListItem>>>, ApiError> {
    let users = state.db.call(|db| db.list_users()).await?;
    Ok(envelope(users.into_iter().map(UserListItem::from).collect()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::super::test_util::TestApp;
    use crate::office::models::UserRole;

    #[tokio::test]
    async fn test_list_users_envelope() {
        let app = TestApp::new();
        let token = app.token_for("zed@example.com", UserRole::Member);
        app.token_for("amy@example.com", UserRole::Admin);

        let (status, body) = app.get("/api/users", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let users = body["data"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["email"], "amy@example.com");
        assert!(users[0].get("passwordHash").is_none());
        assert!(users[0].get("departmentId").is_some());
        assert!(users[0].get("companyId").is_some());
        assert!(users[0].get("createdAt").is_none());
        assert!(users[0].get("updatedAt").is_none());
    }
}
