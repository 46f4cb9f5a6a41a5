use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::ProcedureType,
};

use super::{deserialize_double_option, dentist_routes, normalize_optional, patient_routes};

/// Stored as smallint: 0 planned, 1 in progress, 2 done, 3 cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PlanItemStatus {
    Planned = 0,
    InProgress = 1,
    Done = 2,
    Cancelled = 3,
}

impl PlanItemStatus {
    pub fn can_become(self, to: PlanItemStatus) -> bool {
        use PlanItemStatus::*;
        matches!(
            (self, to),
            (Planned, InProgress) | (Planned, Done) | (InProgress, Done) | (Planned | InProgress, Cancelled)
        ) || self == to
    }
}

/// FDI two-digit notation: permanent teeth 11-48, deciduous 51-85.
pub fn is_valid_fdi_tooth(tooth: i16) -> bool {
    let (quadrant, position) = (tooth / 10, tooth % 10);
    match quadrant {
        1..=4 => (1..=8).contains(&position),
        5..=8 => (1..=5).contains(&position),
        _ => false,
    }
}

const PLAN_ITEM_COLUMNS: &str = r#"
    plan_item_id, patient_id, dentist_id, tooth, procedure_type, description,
    value_cents, status, created_at, updated_at
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PlanItemRow {
    pub plan_item_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Option<Uuid>,
    pub tooth: Option<i16>,
    pub procedure_type: ProcedureType,
    pub description: String,
    pub value_cents: Option<i32>,
    pub status: PlanItemStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanItemRequest {
    pub dentist_id: Option<Uuid>,
    pub tooth: Option<i16>,
    pub procedure_type: ProcedureType,
    pub description: String,
    pub value_cents: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanItemRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub dentist_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub tooth: Option<Option<i16>>,
    pub procedure_type: Option<ProcedureType>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub value_cents: Option<Option<i32>>,
    pub status: Option<PlanItemStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/patients/{patient_id}/plan_items",
            get(list_plan_items).post(create_plan_item),
        )
        .route("/plan_items/{plan_item_id}", get(get_plan_item).patch(update_plan_item))
        .route("/plan_items/{plan_item_id}/cancel", post(cancel_plan_item))
}

fn validate_tooth(tooth: Option<i16>) -> Result<(), ApiError> {
    match tooth {
        Some(t) if !is_valid_fdi_tooth(t) => Err(ApiError::validation(format!(
            "tooth {t} is not a valid FDI tooth number"
        ))),
        _ => Ok(()),
    }
}

fn validate_value(value_cents: Option<i32>) -> Result<(), ApiError> {
    if value_cents.is_some_and(|v| v < 0) {
        return Err(ApiError::validation("value_cents must be >= 0"));
    }
    Ok(())
}

fn validate_create(req: &CreatePlanItemRequest) -> Result<(), ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::validation("description is required"));
    }
    validate_tooth(req.tooth)?;
    validate_value(req.value_cents)
}

async fn load_plan_item(state: &AppState, plan_item_id: Uuid) -> Result<PlanItemRow, ApiError> {
    sqlx::query_as::<_, PlanItemRow>(&format!(
        "SELECT {PLAN_ITEM_COLUMNS} FROM dental_plan_item WHERE plan_item_id = $1"
    ))
    .bind(plan_item_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("plan item"))
}

pub async fn list_plan_items(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<PlanItemRow>>>, ApiError> {
    auth.require(Role::STAFF, "read dental plans")?;
    patient_routes::load_patient(&state, patient_id).await?;

    let rows: Vec<PlanItemRow> = sqlx::query_as::<_, PlanItemRow>(&format!(
        r#"
        SELECT {PLAN_ITEM_COLUMNS}
        FROM dental_plan_item
        WHERE patient_id = $1
        ORDER BY status ASC, tooth ASC NULLS LAST, created_at ASC
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn create_plan_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<CreatePlanItemRequest>,
) -> Result<Json<ApiOk<PlanItemRow>>, ApiError> {
    auth.require(Role::CLINICAL, "edit dental plans")?;
    validate_create(&req)?;
    patient_routes::ensure_patient_bookable(&state, patient_id).await?;
    if let Some(dentist_id) = req.dentist_id {
        dentist_routes::load_dentist(&state, dentist_id).await?;
    }

    let row: PlanItemRow = sqlx::query_as::<_, PlanItemRow>(&format!(
        r#"
        INSERT INTO dental_plan_item
            (patient_id, dentist_id, tooth, procedure_type, description, value_cents, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PLAN_ITEM_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(req.dentist_id)
    .bind(req.tooth)
    .bind(req.procedure_type)
    .bind(req.description.trim())
    .bind(req.value_cents)
    .bind(PlanItemStatus::Planned)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    info!(plan_item_id = %row.plan_item_id, %patient_id, "plan item added");
    Ok(Json(ApiOk::new(row)))
}

pub async fn get_plan_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_item_id): Path<Uuid>,
) -> Result<Json<ApiOk<PlanItemRow>>, ApiError> {
    auth.require(Role::STAFF, "read dental plans")?;
    Ok(Json(ApiOk::new(load_plan_item(&state, plan_item_id).await?)))
}

pub async fn update_plan_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_item_id): Path<Uuid>,
    Json(req): Json<UpdatePlanItemRequest>,
) -> Result<Json<ApiOk<PlanItemRow>>, ApiError> {
    auth.require(Role::CLINICAL, "edit dental plans")?;

    let existing = load_plan_item(&state, plan_item_id).await?;

    let status = req.status.unwrap_or(existing.status);
    if !existing.status.can_become(status) {
        return Err(ApiError::Conflict(
            "INVALID_STATE",
            format!("plan item cannot go from {:?} to {:?}", existing.status, status),
        ));
    }

    let dentist_id = req.dentist_id.unwrap_or(existing.dentist_id);
    if let Some(id) = dentist_id {
        dentist_routes::load_dentist(&state, id).await?;
    }
    let tooth = req.tooth.unwrap_or(existing.tooth);
    validate_tooth(tooth)?;
    let value_cents = req.value_cents.unwrap_or(existing.value_cents);
    validate_value(value_cents)?;
    let description = match normalize_optional(req.description.as_deref()) {
        Some(d) => d,
        None if req.description.is_some() => {
            return Err(ApiError::validation("description cannot be empty"))
        }
        None => existing.description,
    };

    let updated: PlanItemRow = sqlx::query_as::<_, PlanItemRow>(&format!(
        r#"
        UPDATE dental_plan_item
        SET dentist_id = $1,
            tooth = $2,
            procedure_type = $3,
            description = $4,
            value_cents = $5,
            status = $6,
            updated_at = now()
        WHERE plan_item_id = $7
        RETURNING {PLAN_ITEM_COLUMNS}
        "#
    ))
    .bind(dentist_id)
    .bind(tooth)
    .bind(req.procedure_type.unwrap_or(existing.procedure_type))
    .bind(description)
    .bind(value_cents)
    .bind(status)
    .bind(plan_item_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(updated)))
}

pub async fn cancel_plan_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_item_id): Path<Uuid>,
) -> Result<Json<ApiOk<PlanItemRow>>, ApiError> {
    auth.require(Role::CLINICAL, "edit dental plans")?;

    let updated: Option<PlanItemRow> = sqlx::query_as::<_, PlanItemRow>(&format!(
        r#"
        UPDATE dental_plan_item
        SET status = $1, updated_at = now()
        WHERE plan_item_id = $2 AND status IN ($3, $4)
        RETURNING {PLAN_ITEM_COLUMNS}
        "#
    ))
    .bind(PlanItemStatus::Cancelled)
    .bind(plan_item_id)
    .bind(PlanItemStatus::Planned)
    .bind(PlanItemStatus::InProgress)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    match updated {
        Some(row) => Ok(Json(ApiOk::new(row))),
        None => {
            let current = load_plan_item(&state, plan_item_id).await?;
            Err(ApiError::Conflict(
                "INVALID_STATE",
                format!("plan item is {:?} and cannot be cancelled", current.status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fdi_tooth_numbers() {
        for ok in [11, 18, 21, 38, 48, 51, 55, 61, 85] {
            assert!(is_valid_fdi_tooth(ok), "{ok} should be valid");
        }
        for bad in [0, 9, 10, 19, 49, 56, 86, 90, -11] {
            assert!(!is_valid_fdi_tooth(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_plan_item_transitions() {
        use PlanItemStatus::*;
        assert!(Planned.can_become(InProgress));
        assert!(InProgress.can_become(Done));
        assert!(Planned.can_become(Cancelled));
        assert!(!Done.can_become(Planned));
        assert!(!Cancelled.can_become(InProgress));
        assert!(!Done.can_become(Cancelled));
    }

    #[test]
    fn test_validate_create_plan_item() {
        let req = CreatePlanItemRequest {
            dentist_id: None,
            tooth: Some(36),
            procedure_type: ProcedureType::RootCanal,
            description: "endodontic treatment".into(),
            value_cents: Some(90000),
        };
        assert!(validate_create(&req).is_ok());

        let bad_tooth = CreatePlanItemRequest { tooth: Some(29), ..req };
        assert!(validate_create(&bad_tooth).is_err());
    }
}
