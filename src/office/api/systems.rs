use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use super::{ApiError, ApiJson, Envelope, SearchQuery, SharedState, envelope, envelope_with};
use crate::errors::PmoError;
use crate::office::db::{NewSystem, SystemPatch};
use crate::office::models::{BusinessSystem, BusinessSystemWithProjects, SearchFilter};
use crate::office::validate::{Validator, double_option};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/systems", get(list_systems).post(create_system))
        .route(
            "/api/systems/{id}",
            get(get_system).put(update_system).delete(delete_system),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSystemRequest {
    name: Option<String>,
    code: Option<String>,
    purpose: Option<String>,
    is_product: Option<bool>,
    department: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSystemRequest {
    name: Option<String>,
    code: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    purpose: Option<Option<String>>,
    is_product: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    department: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    status: Option<String>,
}

async fn list_systems(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Envelope<Vec<BusinessSystemWithProjects>>>, ApiError> {
    let filter = SearchFilter::from(query);
    let systems = state.db.call(move |db| db.list_systems(&filter)).await?;
    Ok(envelope(systems))
}

async fn get_system(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<BusinessSystemWithProjects>>, ApiError> {
    let system = state
        .db
        .call(move |db| {
            let system = db.get_system_with_projects(&id)?;
            system.ok_or_else(|| PmoError::not_found("Business system", id).into())
        })
        .await?;
    Ok(envelope(system))
}

async fn create_system(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateSystemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let name = v.required("name", req.name.as_deref(), "System name is required");
    let code = v.required("code", req.code.as_deref(), "System code is required");
    v.finish()?;
    let (Some(name), Some(code)) = (name, code) else {
        return Err(PmoError::invalid("name", "System name is required").into());
    };

    let new = NewSystem {
        name,
        code,
        purpose: req.purpose,
        is_product: req.is_product.unwrap_or(false),
        department: req.department,
        description: req.description,
    };
    let system: BusinessSystem = state.db.call(move |db| db.create_system(new)).await?;
    tracing::info!(system_id = %system.id, code = %system.code, "business system created");

    Ok((
        StatusCode::CREATED,
        envelope_with(system, "Business system created"),
    ))
}

async fn update_system(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateSystemRequest>,
) -> Result<Json<Envelope<BusinessSystem>>, ApiError> {
    let mut v = Validator::new();
    let name = v.not_blank("name", req.name.as_deref(), "System name cannot be empty");
    let code = v.not_blank("code", req.code.as_deref(), "System code cannot be empty");
    let status = v.not_blank("status", req.status.as_deref(), "System status cannot be empty");
    v.finish()?;

    let patch = SystemPatch {
        name,
        code,
        purpose: req.purpose,
        is_product: req.is_product,
        department: req.department,
        description: req.description,
        status,
    };
    let system = state.db.call(move |db| db.update_system(&id, patch)).await?;
    tracing::info!(system_id = %system.id, "business system updated");
    Ok(envelope_with(system, "Business system updated"))
}

async fn delete_system(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let system_id = id.clone();
    if !state
        .db
        .call(move |db| db.delete_system(&system_id))
        .await?
    {
        return Err(PmoError::not_found("Business system", id).into());
    }
    tracing::info!(system_id = %id, "business system deleted");
    Ok(envelope_with(serde_json::Value::Null, "Business system deleted"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_util::TestApp;
    use crate::office::models::UserRole;

    #[tokio::test]
    async fn test_create_forces_active_status() {
        let app = TestApp::new();
        let token = app.token_for("admin@example.com", UserRole::Admin);
        let (status, body) = app
            .post(
                "/api/systems",
                &token,
                json!({"name": "Customer Relations", "code": "CRM", "isProduct": true, "status": "RETIRED"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "ACTIVE");
        assert_eq!(body["data"]["isProduct"], true);

        let (status, body) = app.post("/api/systems", &token, json!({"code": "X"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "name");
    }

    #[tokio::test]
    async fn test_system_lifecycle_with_project_links() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let (_, body) = app
            .post("/api/systems", &token, json!({"name": "Ledger", "code": "LED"}))
            .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let (_, body) = app
            .post("/api/projects", &token, json!({"name": "Finance", "code": "FIN"}))
            .await;
        let project_id = body["project"]["id"].as_str().unwrap().to_string();
        app.put(
            &format!("/api/projects/{project_id}/systems"),
            &token,
            json!({"systemIds": [id]}),
        )
        .await;

        let (status, body) = app.get(&format!("/api/systems/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["projects"][0]["code"], "FIN");

        let (status, body) = app
            .put(
                &format!("/api/systems/{id}"),
                &token,
                json!({"status": "RETIRED", "purpose": "Bookkeeping"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "RETIRED");

        let (_, body) = app.get("/api/systems?status=ACTIVE", &token).await;
        assert!(body["data"].as_array().unwrap().is_empty());
        let (_, body) = app.get("/api/systems?search=led", &token).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = app.delete(&format!("/api/systems/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        let (_, detail) = app.get(&format!("/api/projects/{project_id}"), &token).await;
        assert!(detail["businessSystems"].as_array().unwrap().is_empty());
        let (status, _) = app.delete(&format!("/api/systems/{id}"), &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
