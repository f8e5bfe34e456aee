use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, MessageBody, SharedState, message};
use crate::errors::PmoError;
use crate::office::auth::CurrentUser;
use crate::office::db::{IssuePatch, NewIssue};
use crate::office::models::{
    Issue, IssueFilter, IssuePriority, IssueStatus, IssueType, IssueWithProject,
};
use crate::office::validate::{Validator, double_option, path_uuid};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/issues", get(list_issues).post(create_issue))
        .route("/api/issues/project/{project_id}", get(list_project_issues))
        .route(
            "/api/issues/{id}",
            get(get_issue).put(update_issue).delete(delete_issue),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueQuery {
    project_id: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    status: Option<String>,
    priority: Option<String>,
}

impl IssueQuery {
    fn into_filter(self) -> Result<IssueFilter, PmoError> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.is_empty());
        let mut v = Validator::new();
        let issue_type = v.parse_enum("type", non_blank(self.issue_type).as_deref());
        let status = v.parse_enum("status", non_blank(self.status).as_deref());
        let priority = v.parse_enum("priority", non_blank(self.priority).as_deref());
        v.finish()?;
        Ok(IssueFilter {
            project_id: non_blank(self.project_id),
            issue_type,
            status,
            priority,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssueRequest {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    priority: Option<String>,
    project_id: Option<String>,
    status: Option<String>,
    due_date: Option<String>,
    assignee_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateIssueRequest {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    assignee_id: Option<Option<String>>,
}

#[derive(Debug, Serialize)]
struct IssueResponse {
    message: &'static str,
    issue: Issue,
}

async fn list_issues(
    State(state): State<SharedState>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<Vec<IssueWithProject>>, ApiError> {
    let filter = query.into_filter()?;
    let issues = state.db.call(move |db| db.list_issues(&filter)).await?;
    Ok(Json(issues))
}

async fn list_project_issues(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let filter = query.into_filter()?;
    let issues = state
        .db
        .call(move |db| db.list_project_issues(&project_id, &filter))
        .await?;
    Ok(Json(issues))
}

async fn get_issue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<IssueWithProject>, ApiError> {
    let issue = state
        .db
        .call(move |db| {
            let issue = db.get_issue_with_project(&id)?;
            issue.ok_or_else(|| PmoError::not_found("Issue", id).into())
        })
        .await?;
    Ok(Json(issue))
}

async fn create_issue(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(req): ApiJson<CreateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let title = v.required("title", req.title.as_deref(), "Issue title is required");
    let description = v.required(
        "description",
        req.description.as_deref(),
        "Issue description is required",
    );
    let issue_type: Option<IssueType> =
        v.required_enum("type", req.issue_type.as_deref(), "Issue type is required");
    let priority: Option<IssuePriority> = v.required_enum(
        "priority",
        req.priority.as_deref(),
        "Issue priority is required",
    );
    let project_id = v.uuid("projectId", req.project_id.as_deref(), "Invalid project ID");
    let status: Option<IssueStatus> = v.parse_enum("status", req.status.as_deref());
    let due_date = v.date("dueDate", req.due_date.as_deref(), "Invalid due date");
    v.finish()?;
    let (Some(title), Some(description), Some(issue_type), Some(priority), Some(project_id)) =
        (title, description, issue_type, priority, project_id)
    else {
        return Err(PmoError::invalid("title", "Issue title is required").into());
    };

    let new = NewIssue {
        project_id,
        title,
        description,
        issue_type,
        priority,
        status: status.unwrap_or(IssueStatus::Open),
        due_date,
        assignee_id: req.assignee_id.filter(|s| !s.is_empty()),
        reporter_id: Some(current.id().to_string()),
    };
    let issue = state.db.call(move |db| db.create_issue(new)).await?;
    tracing::info!(issue_id = %issue.id, project_id = %issue.project_id, "issue created");

    Ok((
        StatusCode::CREATED,
        Json(IssueResponse {
            message: "Issue created",
            issue,
        }),
    ))
}

async fn update_issue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateIssueRequest>,
) -> Result<Json<IssueResponse>, ApiError> {
    path_uuid(&id, "id", "Invalid issue ID")?;

    let mut v = Validator::new();
    let title = v.not_blank("title", req.title.as_deref(), "Issue title cannot be empty");
    let description = v.not_blank(
        "description",
        req.description.as_deref(),
        "Issue description cannot be empty",
    );
    let issue_type = v.parse_enum("type", req.issue_type.as_deref());
    let priority = v.parse_enum("priority", req.priority.as_deref());
    let status = v.parse_enum("status", req.status.as_deref());
    let due_date = match req.due_date {
        Some(Some(raw)) => v.date("dueDate", Some(&raw), "Invalid due date").map(Some),
        other => other,
    };
    v.finish()?;

    let patch = IssuePatch {
        title,
        description,
        issue_type,
        priority,
        status,
        due_date,
        // An empty string unassigns, like null.
        assignee_id: req
            .assignee_id
            .map(|value| value.filter(|s| !s.is_empty())),
    };
    let issue = state.db.call(move |db| db.update_issue(&id, patch)).await?;
    tracing::info!(issue_id = %issue.id, status = %issue.status, "issue updated");

    Ok(Json(IssueResponse {
        message: "Issue updated",
        issue,
    }))
}

async fn delete_issue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    let issue_id = id.clone();
    if !state.db.call(move |db| db.delete_issue(&issue_id)).await? {
        return Err(PmoError::not_found("Issue", id).into());
    }
    tracing::info!(issue_id = %id, "issue deleted");
    Ok(message("Issue deleted"))
}
