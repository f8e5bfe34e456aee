use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use super::{ApiError, ApiJson, Envelope, SharedState, envelope, envelope_with};
use crate::errors::PmoError;
use crate::office::db::{DepartmentPatch, NewDepartment};
use crate::office::models::{DepartmentNode, DepartmentWithRelations};
use crate::office::tree::build_tree;
use crate::office::validate::{Validator, double_option};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/departments", get(list_departments).post(create_department))
        .route("/api/departments/tree", get(department_tree))
        .route(
            "/api/departments/{id}",
            get(get_department)
                .put(update_department)
                .delete(delete_department),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDepartmentRequest {
    name: Option<String>,
    parent_id: Option<String>,
    order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDepartmentRequest {
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    parent_id: Option<Option<String>>,
    order: Option<i64>,
}

async fn list_departments(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<Vec<DepartmentWithRelations>>>, ApiError> {
    let departments = state
        .db
        .call(|db| db.list_departments_with_relations())
        .await?;
    Ok(envelope(departments))
}

async fn department_tree(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<Vec<DepartmentNode>>>, ApiError> {
    let departments = state.db.call(|db| db.list_departments()).await?;
    Ok(envelope(build_tree(departments)))
}

async fn get_department(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<DepartmentWithRelations>>, ApiError> {
    let department = state
        .db
        .call(move |db| {
            let department = db.get_department_with_relations(&id)?;
            department.ok_or_else(|| PmoError::not_found("Department", id).into())
        })
        .await?;
    Ok(envelope(department))
}

async fn create_department(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateDepartmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let name = v.required("name", req.name.as_deref(), "Department name is required");
    v.finish()?;
    let Some(name) = name else {
        return Err(PmoError::invalid("name", "Department name is required").into());
    };

    let new = NewDepartment {
        name,
        parent_id: req.parent_id.filter(|s| !s.is_empty()),
        order: req.order.unwrap_or(0),
    };
    let department = state.db.call(move |db| db.create_department(new)).await?;
    tracing::info!(department_id = %department.id, "department created");

    Ok((
        StatusCode::CREATED,
        envelope_with(department, "Department created"),
    ))
}

async fn update_department(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateDepartmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let name = v.not_blank("name", req.name.as_deref(), "Department name cannot be empty");
    v.finish()?;

    let patch = DepartmentPatch {
        name,
        parent_id: req.parent_id.map(|value| value.filter(|s| !s.is_empty())),
        order: req.order,
    };
    let department = state
        .db
        .call(move |db| db.update_department(&id, patch))
        .await?;
    tracing::info!(department_id = %department.id, "department updated");
    Ok(envelope_with(department, "Department updated"))
}

async fn delete_department(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let department_id = id.clone();
    if !state
        .db
        .call(move |db| db.delete_department(&department_id))
        .await?
    {
        return Err(PmoError::not_found("Department", id).into());
    }
    tracing::info!(department_id = %id, "department deleted");
    Ok(envelope_with(serde_json::Value::Null, "Department deleted"))
}
