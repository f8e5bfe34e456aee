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
use crate::office::db::{CompanyPatch, NewCompany};
use crate::office::models::{Company, SearchFilter};
use crate::office::validate::{Validator, double_option};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/{id}",
            get(get_company).put(update_company).delete(delete_company),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCompanyRequest {
    name: Option<String>,
    code: Option<String>,
    contact_name: Option<String>,
    contact_phone: Option<String>,
    contact_email: Option<String>,
    address: Option<String>,
    description: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCompanyRequest {
    name: Option<String>,
    code: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    contact_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    contact_email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    status: Option<String>,
}

async fn list_companies(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Envelope<Vec<Company>>>, ApiError> {
    let filter = SearchFilter::from(query);
    let companies = state.db.call(move |db| db.list_companies(&filter)).await?;
    Ok(envelope(companies))
}

async fn get_company(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Company>>, ApiError> {
    let company = state
        .db
        .call(move |db| {
            let company = db.get_company(&id)?;
            company.ok_or_else(|| PmoError::not_found("Company", id).into())
        })
        .await?;
    Ok(envelope(company))
}

async fn create_company(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateCompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let name = v.required("name", req.name.as_deref(), "Company name is required");
    let code = v.required("code", req.code.as_deref(), "Company code is required");
    v.finish()?;
    let (Some(name), Some(code)) = (name, code) else {
        return Err(PmoError::invalid("name", "Company name is required").into());
    };

    let new = NewCompany {
        name,
        code,
        contact_name: req.contact_name,
        contact_phone: req.contact_phone,
        contact_email: req.contact_email,
        address: req.address,
        description: req.description,
        status: req.status.filter(|s| !s.trim().is_empty()),
    };
    let company = state.db.call(move |db| db.create_company(new)).await?;
    tracing::info!(company_id = %company.id, code = %company.code, "company created");

    Ok((
        StatusCode::CREATED,
        envelope_with(company, "Company created"),
    ))
}

async fn update_company(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateCompanyRequest>,
) -> Result<Json<Envelope<Company>>, ApiError> {
    let mut v = Validator::new();
    let name = v.not_blank("name", req.name.as_deref(), "Company name cannot be empty");
    let code = v.not_blank("code", req.code.as_deref(), "Company code cannot be empty");
    let status = v.not_blank("status", req.status.as_deref(), "Company status cannot be empty");
    v.finish()?;

    let patch = CompanyPatch {
        name,
        code,
        contact_name: req.contact_name,
        contact_phone: req.contact_phone,
        contact_email: req.contact_email,
        address: req.address,
        description: req.description,
        status,
    };
    let company = state
        .db
        .call(move |db| db.update_company(&id, patch))
        .await?;
    tracing::info!(company_id = %company.id, "company updated");
    Ok(envelope_with(company, "Company updated"))
}

async fn delete_company(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let company_id = id.clone();
    if !state
        .db
        .call(move |db| db.delete_company(&company_id))
        .await?
    {
        return Err(PmoError::not_found("Company", id).into());
    }
    tracing::info!(company_id = %id, "company deleted");
    Ok(envelope_with(serde_json::Value::Null, "Company deleted"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_util::TestApp;
    use crate::office::models::UserRole;

    #[tokio::test]
    async fn test_company_crud() {
        let app = TestApp::new();
        let token = app.token_for("admin@example.com", UserRole::Admin);

        let (status, body) = app
            .post(
                "/api/companies",
                &token,
                json!({"name": "Acme Consulting", "code": "ACME", "contactName": "Wile"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "active");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .put(
                &format!("/api/companies/{id}"),
                &token,
                json!({"contactName": null, "status": "inactive"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["contactName"].is_null());
        assert_eq!(body["data"]["status"], "inactive");

        let (status, body) = app.get(&format!("/api/companies/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["code"], "ACME");

        let (status, _) = app.delete(&format!("/api/companies/{id}"), &token).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = app.get(&format!("/api/companies/{id}"), &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_company_search_and_status_filter() {
        let app = TestApp::new();
        let token = app.token_for("admin@example.com", UserRole::Admin);
        for (name, code, status) in [
            ("Acme Consulting", "ACME", "active"),
            ("Globex", "GLX", "inactive"),
            ("Initech", "INI", "active"),
        ] {
            app.post(
                "/api/companies",
                &token,
                json!({"name": name, "code": code, "status": status}),
            )
            .await;
        }

        let (_, body) = app.get("/api/companies?search=glx", &token).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["name"], "Globex");

        let (_, body) = app.get("/api/companies?status=active&search=", &token).await;
        let names: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Initech", "Acme Consulting"]);
    }

    #[tokio::test]
    async fn test_company_validation_and_duplicate_code() {
        let app = TestApp::new();
        let token = app.token_for("admin@example.com", UserRole::Admin);
        let (status, body) = app.post("/api/companies", &token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);

        let payload = json!({"name": "Acme", "code": "ACME"});
        app.post("/api/companies", &token, payload.clone()).await;
        let (status, _) = app.post("/api/companies", &token, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
