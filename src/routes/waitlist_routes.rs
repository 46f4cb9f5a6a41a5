use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::{waitlist::NewWaitingEntry, WaitingEntry, WaitingStatus},
};

use super::{dentist_routes, normalize_optional, patient_routes};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<WaitingStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/waitlist", post(add_entry).get(list_entries))
        .route("/waitlist/{entry_id}", get(get_entry))
        .route("/waitlist/{entry_id}/notified", post(mark_notified))
        .route("/waitlist/{entry_id}/withdraw", post(withdraw_entry))
}

pub async fn add_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(mut req): Json<NewWaitingEntry>,
) -> Result<Json<ApiOk<WaitingEntry>>, ApiError> {
    auth.require(Role::FRONT_DESK, "manage the waiting list")?;

    patient_routes::ensure_patient_bookable(&state, req.patient_id).await?;
    if let Some(dentist_id) = req.preferred_dentist_id {
        dentist_routes::load_dentist(&state, dentist_id).await?;
    }
    req.notes = normalize_optional(req.notes.as_deref());

    Ok(Json(ApiOk::new(state.clinic.enqueue(req).await?)))
}

/// Queue order: priority desc, then oldest first.
pub async fn list_entries(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<WaitingEntry>>>, ApiError> {
    auth.require(Role::FRONT_DESK, "manage the waiting list")?;
    Ok(Json(ApiOk::new(state.clinic.waitlist().list(q.status).await?)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<WaitingEntry>>, ApiError> {
    auth.require(Role::FRONT_DESK, "manage the waiting list")?;
    Ok(Json(ApiOk::new(state.clinic.waitlist().get(entry_id).await?)))
}

/// Staff reached the patient; the entry keeps waiting for a slot.
pub async fn mark_notified(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<WaitingEntry>>, ApiError> {
    auth.require(Role::FRONT_DESK, "manage the waiting list")?;
    Ok(Json(ApiOk::new(
        state.clinic.waitlist().mark_notified(entry_id).await?,
    )))
}

pub async fn withdraw_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<WaitingEntry>>, ApiError> {
    auth.require(Role::FRONT_DESK, "manage the waiting list")?;
    Ok(Json(ApiOk::new(state.clinic.waitlist().withdraw(entry_id).await?)))
}
