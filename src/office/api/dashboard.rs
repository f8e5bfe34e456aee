use axum::{Json, Router, extract::State, routing::get};

use super::{ApiError, Envelope, SharedState, envelope};
use crate::office::models::DashboardView;

pub(super) fn routes() -> Router<SharedState> {
    Router::new().route("/api/dashboard", get(dashboard))
}

async fn dashboard(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<DashboardView>>, ApiError> {
    let view = state.db.call(|db| db.dashboard()).await?;
    Ok(envelope(view))
}
