use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
};

use super::{deserialize_double_option, normalize_optional, validate_email};

/// Stored as smallint: 0 active, 1 inactive, 2 archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PatientStatus {
    Active = 0,
    Inactive = 1,
    Archived = 2,
}

const PATIENT_COLUMNS: &str = r#"
    patient_id, register_number, first_name, last_name, email, phone,
    birthday, gender, status, created_at, updated_at
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub register_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: i16,
    pub status: PatientStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    /// Left empty, the database generates one.
    pub register_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub gender: i16,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub birthday: Option<Option<NaiveDate>>,
    pub gender: Option<i16>,
    pub status: Option<PatientStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", post(create_patient).get(search_patients))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
        .route("/patients/{patient_id}/archive", post(archive_patient))
        .route("/patients/{patient_id}/restore", post(restore_patient))
}

fn validate_gender(gender: i16) -> Result<(), ApiError> {
    if !(0..=2).contains(&gender) {
        return Err(ApiError::validation("gender must be 0, 1 or 2"));
    }
    Ok(())
}

fn validate_birthday(birthday: Option<NaiveDate>, today: NaiveDate) -> Result<(), ApiError> {
    if birthday.is_some_and(|b| b > today) {
        return Err(ApiError::validation("birthday cannot be in the future"));
    }
    Ok(())
}

fn validate_create(req: &CreatePatientRequest, today: NaiveDate) -> Result<(), ApiError> {
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::validation("first_name and last_name are required"));
    }
    validate_gender(req.gender)?;
    validate_birthday(req.birthday, today)?;
    if let Some(email) = normalize_optional(req.email.as_deref()) {
        validate_email(&email)?;
    }
    Ok(())
}

pub(crate) async fn load_patient(state: &AppState, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1"
    ))
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient"))
}

/// Bookings and clinical records only accept patients that are not archived.
pub(crate) async fn ensure_patient_bookable(state: &AppState, patient_id: Uuid) -> Result<(), ApiError> {
    let patient = load_patient(state, patient_id).await?;
    if patient.status == PatientStatus::Archived {
        return Err(ApiError::Conflict(
            "INVALID_STATE",
            "patient is archived".into(),
        ));
    }
    Ok(())
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::FRONT_DESK, "register patients")?;
    validate_create(&req, chrono::Local::now().date_naive())?;

    let register_number = normalize_optional(req.register_number.as_deref());

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        INSERT INTO patient (register_number, first_name, last_name, email, phone, birthday, gender, status)
        VALUES (COALESCE($1, nextval('patient_register_seq')::text), $2, $3, $4, $5, $6, $7, $8)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(register_number)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .bind(normalize_optional(req.email.as_deref()))
    .bind(normalize_optional(req.phone.as_deref()))
    .bind(req.birthday)
    .bind(req.gender)
    .bind(PatientStatus::Active)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::db_unique(e, "register_number already in use"))?;

    info!(patient_id = %row.patient_id, "patient registered");
    Ok(Json(ApiOk::new(row)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::STAFF, "read patients")?;
    Ok(Json(ApiOk::new(load_patient(&state, patient_id).await?)))
}

/// Matches register number, first or last name. Archived patients are
/// hidden unless `include_archived=true`.
pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    auth.require(Role::STAFF, "read patients")?;

    let like = normalize_optional(q.query.as_deref()).map(|s| format!("%{s}%"));

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE ($1::text IS NULL
               OR register_number ILIKE $1
               OR first_name ILIKE $1
               OR last_name ILIKE $1)
          AND ($2 OR status <> $3)
        ORDER BY last_name ASC, first_name ASC
        LIMIT 50
        "#
    ))
    .bind(like)
    .bind(q.include_archived)
    .bind(PatientStatus::Archived)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::FRONT_DESK, "edit patients")?;

    let existing = load_patient(&state, patient_id).await?;

    let first_name = match req.first_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        Some(_) => return Err(ApiError::validation("first_name cannot be empty")),
        None => existing.first_name,
    };
    let last_name = match req.last_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        Some(_) => return Err(ApiError::validation("last_name cannot be empty")),
        None => existing.last_name,
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
    let birthday = match req.birthday {
        None => existing.birthday,
        Some(v) => v,
    };
    validate_birthday(birthday, chrono::Local::now().date_naive())?;
    let gender = req.gender.unwrap_or(existing.gender);
    validate_gender(gender)?;
    let status = req.status.unwrap_or(existing.status);

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET first_name = $1,
            last_name = $2,
            email = $3,
            phone = $4,
            birthday = $5,
            gender = $6,
            status = $7,
            updated_at = now()
        WHERE patient_id = $8
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(phone)
    .bind(birthday)
    .bind(gender)
    .bind(status)
    .bind(patient_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(updated)))
}

async fn set_status(
    state: &AppState,
    patient_id: Uuid,
    status: PatientStatus,
) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET status = $1, updated_at = now()
        WHERE patient_id = $2
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(status)
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient"))
}

pub async fn archive_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "archive patients")?;
    let row = set_status(&state, patient_id, PatientStatus::Archived).await?;
    info!(%patient_id, "patient archived");
    Ok(Json(ApiOk::new(row)))
}

pub async fn restore_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "restore patients")?;
    Ok(Json(ApiOk::new(
        set_status(&state, patient_id, PatientStatus::Active).await?,
    )))
}
