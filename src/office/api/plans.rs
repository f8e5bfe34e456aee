use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, MessageBody, SharedState, message};
use crate::errors::PmoError;
use crate::office::auth::CurrentUser;
use crate::office::db::{MilestonePatch, NewDetailPlan, NewMilestone};
use crate::office::models::{DetailPlan, Milestone, PlanStatus};
use crate::office::validate::{Validator, double_option};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/plans/milestones", post(create_milestone))
        .route(
            "/api/plans/milestones/{id}",
            put(update_milestone).delete(delete_milestone),
        )
        .route("/api/plans/milestones/{id}/details", post(create_detail_plan))
        .route("/api/plans/details/{id}", delete(delete_detail_plan))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMilestoneRequest {
    project_id: Option<String>,
    name: Option<String>,
    planned_date: Option<String>,
    actual_date: Option<String>,
    status: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMilestoneRequest {
    name: Option<String>,
    planned_date: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    actual_date: Option<Option<String>>,
    status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDetailPlanRequest {
    name: Option<String>,
    #[serde(rename = "type")]
    plan_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    status: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct MilestoneResponse {
    message: &'static str,
    milestone: Milestone,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailPlanResponse {
    message: &'static str,
    detail_plan: DetailPlan,
}

async fn create_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(req): ApiJson<CreateMilestoneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_manager()?;

    let mut v = Validator::new();
    let project_id = v.required("projectId", req.project_id.as_deref(), "Project ID is required");
    let name = v.required("name", req.name.as_deref(), "Milestone name is required");
    let planned_date = v.required_date(
        "plannedDate",
        req.planned_date.as_deref(),
        "Invalid planned date",
    );
    let actual_date = v.date("actualDate", req.actual_date.as_deref(), "Invalid actual date");
    let status: Option<PlanStatus> = v.parse_enum("status", req.status.as_deref());
    v.finish()?;
    let (Some(project_id), Some(name), Some(planned_date)) = (project_id, name, planned_date) else {
        return Err(PmoError::invalid("projectId", "Project ID is required").into());
    };

    let new = NewMilestone {
        project_id,
        name,
        planned_date,
        actual_date,
        status: status.unwrap_or(PlanStatus::Pending),
        description: req.description,
    };
    let milestone = state.db.call(move |db| db.create_milestone(new)).await?;
    tracing::info!(milestone_id = %milestone.id, project_id = %milestone.project_id, "milestone created");

    Ok((
        StatusCode::CREATED,
        Json(MilestoneResponse {
            message: "Milestone created",
            milestone,
        }),
    ))
}

async fn update_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateMilestoneRequest>,
) -> Result<Json<MilestoneResponse>, ApiError> {
    current.require_manager()?;

    let mut v = Validator::new();
    let name = v.not_blank("name", req.name.as_deref(), "Milestone name cannot be empty");
    let planned_date = v.date("plannedDate", req.planned_date.as_deref(), "Invalid planned date");
    let actual_date = match req.actual_date {
        Some(Some(raw)) => v
            .date("actualDate", Some(&raw), "Invalid actual date")
            .map(Some),
        other => other,
    };
    let status: Option<PlanStatus> = v.parse_enum("status", req.status.as_deref());
    v.finish()?;

    let patch = MilestonePatch {
        name,
        planned_date,
        actual_date,
        status,
        description: req.description,
    };
    let milestone = state
        .db
        .call(move |db| db.update_milestone(&id, patch))
        .await?;
    Ok(Json(MilestoneResponse {
        message: "Milestone updated",
        milestone,
    }))
}

async fn delete_milestone(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    current.require_manager()?;
    let milestone_id = id.clone();
    if !state
        .db
        .call(move |db| db.delete_milestone(&milestone_id))
        .await?
    {
        return Err(PmoError::not_found("Milestone", id).into());
    }
    tracing::info!(milestone_id = %id, "milestone deleted");
    Ok(message("Milestone deleted"))
}

async fn create_detail_plan(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(milestone_id): Path<String>,
    ApiJson(req): ApiJson<CreateDetailPlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_manager()?;

    let mut v = Validator::new();
    let name = v.required("name", req.name.as_deref(), "Plan name is required");
    let plan_type = v.required("type", req.plan_type.as_deref(), "Plan type is required");
    let start_date = v.required_date("startDate", req.start_date.as_deref(), "Invalid start date");
    let end_date = v.required_date("endDate", req.end_date.as_deref(), "Invalid end date");
    let status: Option<PlanStatus> = v.parse_enum("status", req.status.as_deref());
    v.finish()?;
    let (Some(name), Some(plan_type), Some(start_date), Some(end_date)) =
        (name, plan_type, start_date, end_date)
    else {
        return Err(PmoError::invalid("name", "Plan name is required").into());
    };

    let new = NewDetailPlan {
        name,
        plan_type,
        start_date,
        end_date,
        status: status.unwrap_or(PlanStatus::Pending),
        description: req.description,
    };
    let detail_plan = state
        .db
        .call(move |db| db.create_detail_plan(&milestone_id, new))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DetailPlanResponse {
            message: "Detail plan created",
            detail_plan,
        }),
    ))
}

async fn delete_detail_plan(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    current.require_manager()?;
    let plan_id = id.clone();
    if !state
        .db
        .call(move |db| db.delete_detail_plan(&plan_id))
        .await?
    {
        return Err(PmoError::not_found("Detail plan", id).into());
    }
    Ok(message("Detail plan deleted"))
}
