use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::OperatingHours,
};

use super::auth_routes::load_clinic_name;

pub const MAX_CLINIC_NAME_LEN: usize = 128;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clinic", get(get_clinic).patch(update_clinic))
        .route("/clinic/hours", get(get_hours))
}

#[derive(Debug, Serialize)]
pub struct ClinicData {
    pub clinic_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub clinic_name: String,
}

fn validate_clinic_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::validation("clinic_name is required"));
    }
    if name.chars().count() > MAX_CLINIC_NAME_LEN {
        return Err(ApiError::validation(format!(
            "clinic_name is too long (max {MAX_CLINIC_NAME_LEN})"
        )));
    }
    Ok(name)
}

pub async fn get_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ClinicData>>, ApiError> {
    auth.require(Role::STAFF, "read clinic settings")?;
    Ok(Json(ApiOk::new(ClinicData {
        clinic_name: load_clinic_name(&state).await?,
    })))
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicData>>, ApiError> {
    auth.require(Role::MANAGEMENT, "update clinic settings")?;
    let name = validate_clinic_name(&req.clinic_name)?;

    // Upsert the singleton row
    let clinic_name: String = sqlx::query_scalar(
        r#"
        INSERT INTO clinic_settings (singleton_id, clinic_name)
        VALUES (TRUE, $1)
        ON CONFLICT (singleton_id)
        DO UPDATE SET clinic_name = EXCLUDED.clinic_name
        RETURNING clinic_name
        "#,
    )
    .bind(name)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(ClinicData { clinic_name })))
}

/// Read-only: hours come from the environment at startup.
pub async fn get_hours(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OperatingHours>>, ApiError> {
    auth.require(Role::STAFF, "read clinic settings")?;
    Ok(Json(ApiOk::new(state.clinic.hours().clone())))
}
