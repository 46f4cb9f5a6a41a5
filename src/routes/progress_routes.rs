use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
};

use super::{dentist_routes, patient_routes};

pub const MAX_NOTE_LEN: usize = 10_000;

const NOTE_COLUMNS: &str = r#"
    progress_note_id, patient_id, dentist_id, appointment_id, plan_item_id,
    note, created_by, created_at, updated_at
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProgressNoteRow {
    pub progress_note_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub plan_item_id: Option<Uuid>,
    pub note: String,
    pub created_by: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProgressNoteRequest {
    pub dentist_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub plan_item_id: Option<Uuid>,
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressNoteRequest {
    pub note: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/patients/{patient_id}/progress_notes",
            get(list_progress_notes).post(create_progress_note),
        )
        .route(
            "/progress_notes/{progress_note_id}",
            get(get_progress_note).patch(update_progress_note),
        )
}

fn validate_note(note: &str) -> Result<&str, ApiError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(ApiError::validation("note is required"));
    }
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(ApiError::validation(format!(
            "note must be at most {MAX_NOTE_LEN} characters"
        )));
    }
    Ok(note)
}

/// Linked appointment and plan item must belong to the same patient.
async fn ensure_links_belong_to(
    state: &AppState,
    patient_id: Uuid,
    req: &CreateProgressNoteRequest,
) -> Result<(), ApiError> {
    if let Some(appointment_id) = req.appointment_id {
        let owner = state.clinic.scheduler().get(appointment_id).await?.patient_id;
        if owner != patient_id {
            return Err(ApiError::validation(
                "appointment belongs to another patient",
            ));
        }
    }
    if let Some(plan_item_id) = req.plan_item_id {
        let owner: Uuid = sqlx::query_scalar(
            "SELECT patient_id FROM dental_plan_item WHERE plan_item_id = $1",
        )
        .bind(plan_item_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("plan item"))?;
        if owner != patient_id {
            return Err(ApiError::validation("plan item belongs to another patient"));
        }
    }
    Ok(())
}

pub async fn list_progress_notes(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<ProgressNoteRow>>>, ApiError> {
    auth.require(Role::CLINICAL, "read progress notes")?;
    patient_routes::load_patient(&state, patient_id).await?;

    let rows: Vec<ProgressNoteRow> = sqlx::query_as::<_, ProgressNoteRow>(&format!(
        r#"
        SELECT {NOTE_COLUMNS}
        FROM progress_note
        WHERE patient_id = $1
        ORDER BY created_at DESC
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn create_progress_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<CreateProgressNoteRequest>,
) -> Result<Json<ApiOk<ProgressNoteRow>>, ApiError> {
    auth.require(Role::CLINICAL, "write progress notes")?;
    let note = validate_note(&req.note)?;

    patient_routes::load_patient(&state, patient_id).await?;
    dentist_routes::load_dentist(&state, req.dentist_id).await?;
    ensure_links_belong_to(&state, patient_id, &req).await?;

    let row: ProgressNoteRow = sqlx::query_as::<_, ProgressNoteRow>(&format!(
        r#"
        INSERT INTO progress_note
            (patient_id, dentist_id, appointment_id, plan_item_id, note, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {NOTE_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(req.dentist_id)
    .bind(req.appointment_id)
    .bind(req.plan_item_id)
    .bind(note)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(row)))
}

pub async fn get_progress_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(progress_note_id): Path<Uuid>,
) -> Result<Json<ApiOk<ProgressNoteRow>>, ApiError> {
    auth.require(Role::CLINICAL, "read progress notes")?;

    let row = sqlx::query_as::<_, ProgressNoteRow>(&format!(
        "SELECT {NOTE_COLUMNS} FROM progress_note WHERE progress_note_id = $1"
    ))
    .bind(progress_note_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("progress note"))?;

    Ok(Json(ApiOk::new(row)))
}

/// Only the note text is editable; the links are fixed at creation.
pub async fn update_progress_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(progress_note_id): Path<Uuid>,
    Json(req): Json<UpdateProgressNoteRequest>,
) -> Result<Json<ApiOk<ProgressNoteRow>>, ApiError> {
    auth.require(Role::CLINICAL, "write progress notes")?;
    let note = validate_note(&req.note)?;

    let row = sqlx::query_as::<_, ProgressNoteRow>(&format!(
        r#"
        UPDATE progress_note
        SET note = $1, updated_at = now()
        WHERE progress_note_id = $2
        RETURNING {NOTE_COLUMNS}
        "#
    ))
    .bind(note)
    .bind(progress_note_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("progress note"))?;

    Ok(Json(ApiOk::new(row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_note() {
        assert_eq!(validate_note("  caries removed, composite placed ").unwrap(), "caries removed, composite placed");
        assert!(validate_note("   ").is_err());
        assert!(validate_note(&"x".repeat(MAX_NOTE_LEN + 1)).is_err());
        assert!(validate_note(&"x".repeat(MAX_NOTE_LEN)).is_ok());
    }
}
