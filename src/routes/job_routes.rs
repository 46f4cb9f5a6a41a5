use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::service::JobKind,
};

#[derive(Debug, Serialize)]
pub struct JobRunData {
    pub job: JobKind,
    /// False when a run of the same job was already in progress.
    pub ran: bool,
    /// Entries promoted, entries expired, or reminders sent.
    pub affected: u64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/jobs/{job}/run", post(run_job))
}

pub async fn run_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job): Path<String>,
) -> Result<Json<ApiOk<JobRunData>>, ApiError> {
    auth.require(Role::MANAGEMENT, "trigger jobs")?;

    let kind = JobKind::parse(&job).ok_or_else(|| ApiError::not_found("job"))?;
    info!(?kind, user_id = %auth.user_id, "manual job trigger");

    let data = match state.clinic.run_job(kind).await {
        Some(result) => JobRunData {
            job: kind,
            ran: true,
            affected: result?,
        },
        None => JobRunData {
            job: kind,
            ran: false,
            affected: 0,
        },
    };
    Ok(Json(ApiOk::new(data)))
}
