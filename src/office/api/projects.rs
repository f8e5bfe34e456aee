use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, MessageBody, SharedState, message};
use crate::errors::PmoError;
use crate::office::auth::CurrentUser;
use crate::office::db::{NewProject, ProjectPatch};
use crate::office::models::{
    BusinessSystem, MemberWithUser, Project, ProjectDetail, ProjectListItem, ProjectStatus,
};
use crate::office::validate::{Validator, double_option, path_uuid};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/members", post(add_member))
        .route(
            "/api/projects/{project_id}/members/{member_id}",
            delete(remove_member),
        )
        .route("/api/projects/{id}/systems", put(set_systems))
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    name: Option<String>,
    code: Option<String>,
    status: Option<String>,
    start_date: Option<String>,
    planned_end_date: Option<String>,
    description: Option<String>,
    implementer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProjectRequest {
    name: Option<String>,
    status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    planned_end_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    actual_end_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    implementer_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    user_id: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSystemsRequest {
    system_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProjectResponse {
    message: &'static str,
    project: Project,
}

#[derive(Debug, Serialize)]
struct MemberResponse {
    message: &'static str,
    member: MemberWithUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemsResponse {
    message: &'static str,
    business_systems: Vec<BusinessSystem>,
}

/// Validate an optional nullable date: `null` clears, a string must parse.
fn nullable_date(
    v: &mut Validator,
    field: &str,
    value: Option<Option<String>>,
    message: &str,
) -> Option<Option<String>> {
    match value {
        None => None,
        Some(None) => Some(None),
        Some(Some(raw)) => v.date(field, Some(&raw), message).map(Some),
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ProjectListItem>>, ApiError> {
    let projects = state.db.call(|db| db.list_projects()).await?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectDetail>, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            let detail = db.get_project_detail(&id)?;
            detail.ok_or_else(|| PmoError::not_found("Project", id).into())
        })
        .await?;
    Ok(Json(detail))
}

async fn create_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(req): ApiJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_manager()?;

    let mut v = Validator::new();
    let name = v.required("name", req.name.as_deref(), "Project name is required");
    let code = v.required("code", req.code.as_deref(), "Project code is required");
    let status: Option<ProjectStatus> = v.parse_enum("status", req.status.as_deref());
    let start_date = v.date("startDate", req.start_date.as_deref(), "Invalid start date");
    let planned_end_date = v.date(
        "plannedEndDate",
        req.planned_end_date.as_deref(),
        "Invalid planned end date",
    );
    v.finish()?;
    let (Some(name), Some(code)) = (name, code) else {
        return Err(PmoError::invalid("name", "Project name is required").into());
    };

    let new = NewProject {
        name,
        code,
        status: status.unwrap_or(ProjectStatus::Planning),
        description: req.description,
        start_date,
        planned_end_date,
        implementer_id: blank_to_none(req.implementer_id),
    };
    let creator_id = current.id().to_string();
    let project = state
        .db
        .call(move |db| db.create_project(new, &creator_id))
        .await?;
    tracing::info!(project_id = %project.id, code = %project.code, "project created");

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            message: "Project created",
            project,
        }),
    ))
}

async fn update_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    current.require_manager()?;
    path_uuid(&id, "id", "Invalid project ID")?;

    let mut v = Validator::new();
    let name = v.not_blank("name", req.name.as_deref(), "Project name cannot be empty");
    let status: Option<ProjectStatus> = v.parse_enum("status", req.status.as_deref());
    let start_date = nullable_date(&mut v, "startDate", req.start_date, "Invalid start date");
    let planned_end_date = nullable_date(
        &mut v,
        "plannedEndDate",
        req.planned_end_date,
        "Invalid planned end date",
    );
    let actual_end_date = nullable_date(
        &mut v,
        "actualEndDate",
        req.actual_end_date,
        "Invalid actual end date",
    );
    v.finish()?;

    let patch = ProjectPatch {
        name,
        status,
        description: req.description,
        start_date,
        planned_end_date,
        actual_end_date,
        implementer_id: req.implementer_id.map(blank_to_none),
    };
    let project = state
        .db
        .call(move |db| db.update_project(&id, patch))
        .await?;
    tracing::info!(project_id = %project.id, "project updated");

    Ok(Json(ProjectResponse {
        message: "Project updated",
        project,
    }))
}

async fn delete_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    current.require_manager()?;
    let project_id = id.clone();
    let deleted = state
        .db
        .call(move |db| db.delete_project(&project_id))
        .await?;
    if !deleted {
        return Err(PmoError::not_found("Project", id).into());
    }
    tracing::info!(project_id = %id, "project deleted");
    Ok(message("Project deleted"))
}

async fn add_member(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<String>,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_manager()?;

    let mut v = Validator::new();
    let user_id = v.uuid("userId", req.user_id.as_deref(), "Invalid user ID");
    let role = v.required("role", req.role.as_deref(), "Member role is required");
    v.finish()?;
    let (Some(user_id), Some(role)) = (user_id, role) else {
        return Err(PmoError::invalid("userId", "Invalid user ID").into());
    };

    let member = state
        .db
        .call(move |db| db.add_member(&project_id, &user_id, &role))
        .await?;
    tracing::info!(
        project_id = %member.member.project_id,
        user_id = %member.member.user_id,
        "project member added"
    );

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            message: "Member added",
            member,
        }),
    ))
}

async fn remove_member(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path((project_id, member_id)): Path<(String, String)>,
) -> Result<Json<MessageBody>, ApiError> {
    current.require_manager()?;
    let mid = member_id.clone();
    let removed = state
        .db
        .call(move |db| db.remove_member(&project_id, &mid))
        .await?;
    if !removed {
        return Err(PmoError::not_found("Project member", member_id).into());
    }
    tracing::info!(member_id = %member_id, "project member removed");
    Ok(message("Member removed"))
}

async fn set_systems(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SetSystemsRequest>,
) -> Result<Json<SystemsResponse>, ApiError> {
    current.require_manager()?;
    let business_systems = state
        .db
        .call(move |db| db.set_project_systems(&id, &req.system_ids))
        .await?;
    Ok(Json(SystemsResponse {
        message: "Business systems updated",
        business_systems,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_util::TestApp;
    use crate::office::models::UserRole;

    async fn create(app: &TestApp, token: &str, code: &str) -> String {
        let (status, body) = app
            .post(
                "/api/projects",
                token,
                json!({"name": format!("Project {code}"), "code": code, "startDate": "2026-01-05"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["project"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_project_defaults_and_membership() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let id = create(&app, &token, "ERP").await;

        let (status, detail) = app.get(&format!("/api/projects/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "PLANNING");
        assert_eq!(detail["startDate"], "2026-01-05T00:00:00.000Z");
        assert_eq!(detail["members"][0]["role"], "Project Manager");
        assert_eq!(detail["members"][0]["user"]["email"], "pm@example.com");
        assert_eq!(detail["businessSystems"], json!([]));
        assert!(detail["implementer"].is_null());
    }

    #[tokio::test]
    async fn test_member_cannot_create_project() {
        let app = TestApp::new();
        let token = app.token_for("dev@example.com", UserRole::Member);
        let (status, body) = app
            .post("/api/projects", &token, json!({"name": "X", "code": "X"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_create_project_validation() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Admin);
        let (status, body) = app
            .post(
                "/api/projects",
                &token,
                json!({"name": "", "code": "C", "status": "DONE", "plannedEndDate": "someday"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_project_code() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        create(&app, &token, "ERP").await;
        let (status, body) = app
            .post("/api/projects", &token, json!({"name": "Again", "code": "ERP"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Project code already exists");
    }

    #[tokio::test]
    async fn test_list_projects_bare_array() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        create(&app, &token, "ERP").await;
        let (status, body) = app.get("/api/projects", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["code"], "ERP");
        assert_eq!(body[0]["_count"]["members"], 1);
    }

    #[tokio::test]
    async fn test_update_project_rules() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let id = create(&app, &token, "ERP").await;

        let (status, _) = app
            .put("/api/projects/not-a-uuid", &token, json!({"name": "X"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .put(
                "/api/projects/8f14e45f-ceea-4e7a-9f1c-2b7d8a1e3c55",
                &token,
                json!({"name": "X"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .put(
                &format!("/api/projects/{id}"),
                &token,
                json!({"status": "ONGOING", "startDate": null, "actualEndDate": "2026-06-30"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["project"]["status"], "ONGOING");
        assert!(body["project"]["startDate"].is_null());
        assert_eq!(body["project"]["actualEndDate"], "2026-06-30T00:00:00.000Z");
    }

    #[tokio::test]
    async fn test_members_add_and_remove() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        app.token_for("dev@example.com", UserRole::Member);
        let dev_id = app.user_id("dev@example.com");
        let id = create(&app, &token, "ERP").await;

        let (status, body) = app
            .post(
                &format!("/api/projects/{id}/members"),
                &token,
                json!({"userId": dev_id, "role": "Developer"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let member_id = body["member"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .post(
                &format!("/api/projects/{id}/members"),
                &token,
                json!({"userId": dev_id, "role": "Developer"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .delete(&format!("/api/projects/{id}/members/{member_id}"), &token)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .delete(&format!("/api/projects/{id}/members/{member_id}"), &token)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_project() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let id = create(&app, &token, "ERP").await;
        let (status, body) = app.delete(&format!("/api/projects/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Project deleted");
        let (status, _) = app.get(&format!("/api/projects/{id}"), &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_link_business_systems() {
        let app = TestApp::new();
        let token = app.token_for("pm@example.com", UserRole::Manager);
        let id = create(&app, &token, "ERP").await;
        let (_, system) = app
            .post("/api/systems", &token, json!({"name": "CRM", "code": "CRM"}))
            .await;
        let system_id = system["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .put(
                &format!("/api/projects/{id}/systems"),
                &token,
                json!({"systemIds": [system_id]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["businessSystems"][0]["code"], "CRM");

        let (_, systems) = app.get("/api/systems", &token).await;
        assert_eq!(systems["data"][0]["projects"][0]["code"], "ERP");
    }
}
