use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::{hours::DayHours, Appointment},
};

use super::{deserialize_double_option, normalize_optional, validate_email};

/// Stored as smallint: 0 active, 1 inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum DentistStatus {
    Active = 0,
    Inactive = 1,
}

const DENTIST_COLUMNS: &str = r#"
    dentist_id, user_id, first_name, last_name, license_number, specialty,
    email, phone, status, created_at, updated_at
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DentistRow {
    pub dentist_id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub license_number: String,
    pub specialty: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: DentistStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDentistRequest {
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub license_number: String,
    pub specialty: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDentistRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub user_id: Option<Option<Uuid>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub license_number: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub specialty: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct DaySchedule {
    pub dentist_id: Uuid,
    pub date: NaiveDate,
    pub hours: DayHours,
    pub appointments: Vec<Appointment>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dentists", post(create_dentist).get(list_dentists))
        .route("/dentists/{dentist_id}", get(get_dentist).patch(update_dentist))
        .route("/dentists/{dentist_id}/deactivate", post(deactivate_dentist))
        .route("/dentists/{dentist_id}/activate", post(activate_dentist))
        .route("/dentists/{dentist_id}/schedule", get(day_schedule))
}

/// CRO style: digits, optionally prefixed with a state code ("SP-12345").
fn validate_license_number(raw: &str) -> Result<String, ApiError> {
    let s = raw.trim().to_uppercase();
    let digits = s.rsplit('-').next().unwrap_or_default();
    if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation(
            "license_number must end in at least 3 digits",
        ));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ApiError::validation(
            "license_number may only contain letters, digits and '-'",
        ));
    }
    Ok(s)
}

fn validate_create(req: &CreateDentistRequest) -> Result<String, ApiError> {
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::validation("first_name and last_name are required"));
    }
    if let Some(email) = normalize_optional(req.email.as_deref()) {
        validate_email(&email)?;
    }
    validate_license_number(&req.license_number)
}

pub(crate) async fn load_dentist(state: &AppState, dentist_id: Uuid) -> Result<DentistRow, ApiError> {
    sqlx::query_as::<_, DentistRow>(&format!(
        "SELECT {DENTIST_COLUMNS} FROM dentist WHERE dentist_id = $1"
    ))
    .bind(dentist_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("dentist"))
}

/// New bookings need an active dentist.
pub(crate) async fn ensure_dentist_active(state: &AppState, dentist_id: Uuid) -> Result<(), ApiError> {
    if load_dentist(state, dentist_id).await?.status != DentistStatus::Active {
        return Err(ApiError::Conflict(
            "INVALID_STATE",
            "dentist is inactive".into(),
        ));
    }
    Ok(())
}

pub async fn create_dentist(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateDentistRequest>,
) -> Result<Json<ApiOk<DentistRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage dentists")?;
    let license_number = validate_create(&req)?;

    let row: DentistRow = sqlx::query_as::<_, DentistRow>(&format!(
        r#"
        INSERT INTO dentist (user_id, first_name, last_name, license_number, specialty, email, phone, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {DENTIST_COLUMNS}
        "#
    ))
    .bind(req.user_id)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .bind(license_number)
    .bind(normalize_optional(req.specialty.as_deref()))
    .bind(normalize_optional(req.email.as_deref()))
    .bind(normalize_optional(req.phone.as_deref()))
    .bind(DentistStatus::Active)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::db_unique(e, "license_number or user already registered"))?;

    info!(dentist_id = %row.dentist_id, "dentist registered");
    Ok(Json(ApiOk::new(row)))
}

pub async fn list_dentists(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<DentistRow>>>, ApiError> {
    auth.require(Role::STAFF, "read dentists")?;

    let rows: Vec<DentistRow> = sqlx::query_as::<_, DentistRow>(&format!(
        r#"
        SELECT {DENTIST_COLUMNS}
        FROM dentist
        WHERE ($1 OR status = $2)
        ORDER BY last_name ASC, first_name ASC
        "#
    ))
    .bind(q.include_inactive)
    .bind(DentistStatus::Active)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_dentist(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(dentist_id): Path<Uuid>,
) -> Result<Json<ApiOk<DentistRow>>, ApiError> {
    auth.require(Role::STAFF, "read dentists")?;
    Ok(Json(ApiOk::new(load_dentist(&state, dentist_id).await?)))
}

pub async fn update_dentist(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(dentist_id): Path<Uuid>,
    Json(req): Json<UpdateDentistRequest>,
) -> Result<Json<ApiOk<DentistRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage dentists")?;

    let existing = load_dentist(&state, dentist_id).await?;

    let first_name = match req.first_name.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::validation("first_name cannot be empty")),
        Some(s) => s.to_string(),
        None => existing.first_name,
    };
    let last_name = match req.last_name.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::validation("last_name cannot be empty")),
        Some(s) => s.to_string(),
        None => existing.last_name,
    };
    let license_number = match req.license_number.as_deref() {
        Some(s) => validate_license_number(s)?,
        None => existing.license_number,
    };
    let user_id = req.user_id.unwrap_or(existing.user_id);
    let specialty = match req.specialty {
        None => existing.specialty,
        Some(v) => normalize_optional(v.as_deref()),
    };
    let email = match req.email {
        None => existing.email,
        Some(v) => normalize_optional(v.as_deref()),
    };
    if let Some(e) = &email {
        validate_email(e)?;
    }
    let phone = match req.phone {
        None => existing.phone,
        Some(v) => normalize_optional(v.as_deref()),
    };

    let updated: DentistRow = sqlx::query_as::<_, DentistRow>(&format!(
        r#"
        UPDATE dentist
        SET user_id = $1,
            first_name = $2,
            last_name = $3,
            license_number = $4,
            specialty = $5,
            email = $6,
            phone = $7,
            updated_at = now()
        WHERE dentist_id = $8
        RETURNING {DENTIST_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(first_name)
    .bind(last_name)
    .bind(license_number)
    .bind(specialty)
    .bind(email)
    .bind(phone)
    .bind(dentist_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::db_unique(e, "license_number or user already registered"))?;

    Ok(Json(ApiOk::new(updated)))
}

async fn set_status(
    state: &AppState,
    dentist_id: Uuid,
    status: DentistStatus,
) -> Result<DentistRow, ApiError> {
    sqlx::query_as::<_, DentistRow>(&format!(
        r#"
        UPDATE dentist
        SET status = $1, updated_at = now()
        WHERE dentist_id = $2
        RETURNING {DENTIST_COLUMNS}
        "#
    ))
    .bind(status)
    .bind(dentist_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("dentist"))
}

/// Existing appointments are kept; the dentist just stops taking new ones.
pub async fn deactivate_dentist(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(dentist_id): Path<Uuid>,
) -> Result<Json<ApiOk<DentistRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage dentists")?;
    let row = set_status(&state, dentist_id, DentistStatus::Inactive).await?;
    info!(%dentist_id, "dentist deactivated");
    Ok(Json(ApiOk::new(row)))
}

pub async fn activate_dentist(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(dentist_id): Path<Uuid>,
) -> Result<Json<ApiOk<DentistRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage dentists")?;
    Ok(Json(ApiOk::new(
        set_status(&state, dentist_id, DentistStatus::Active).await?,
    )))
}

/// Operating hours of that weekday plus every appointment of the day, any status.
pub async fn day_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(dentist_id): Path<Uuid>,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<ApiOk<DaySchedule>>, ApiError> {
    auth.require(Role::STAFF, "read schedules")?;
    load_dentist(&state, dentist_id).await?;

    let appointments = state
        .clinic
        .scheduler()
        .day_schedule(dentist_id, q.date)
        .await?;

    Ok(Json(ApiOk::new(DaySchedule {
        dentist_id,
        date: q.date,
        hours: *state.clinic.hours().day(q.date.weekday()),
        appointments,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_license_number() {
        assert_eq!(validate_license_number(" sp-12345 ").unwrap(), "SP-12345");
        assert_eq!(validate_license_number("98765").unwrap(), "98765");
        assert!(validate_license_number("SP-12").is_err());
        assert!(validate_license_number("SP 12345").is_err());
        assert!(validate_license_number("").is_err());
    }

    #[test]
    fn test_validate_create_dentist() {
        let req = CreateDentistRequest {
            user_id: None,
            first_name: "Ana".into(),
            last_name: "Souza".into(),
            license_number: "RJ-4521".into(),
            specialty: Some("Endodontics".into()),
            email: Some("ana@clinic.example".into()),
            phone: None,
        };
        assert_eq!(validate_create(&req).unwrap(), "RJ-4521");

        let req = CreateDentistRequest {
            first_name: "".into(),
            ..req
        };
        assert!(validate_create(&req).is_err());
    }
}
