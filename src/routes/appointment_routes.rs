use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    scheduling::{
        hours::OperatingHours,
        scheduler::ScheduleRequest,
        promotion::Promotion,
        service::{CancelOutcome, RescheduleOutcome},
        Appointment, ProcedureType,
    },
};

use super::{dentist_routes, patient_routes};

/// Dentists only ever see their own schedule; front-desk roles see any.
async fn resolve_dentist_scope(
    state: &AppState,
    auth: &AuthContext,
    requested: Uuid,
) -> Result<Uuid, ApiError> {
    match auth.role() {
        Some(r) if Role::FRONT_DESK.contains(&r) => Ok(requested),
        Some(Role::Dentist) => {
            let own: Option<Uuid> =
                sqlx::query_scalar("SELECT dentist_id FROM dentist WHERE user_id = $1")
                    .bind(auth.user_id)
                    .fetch_optional(&state.db)
                    .await
                    .map_err(ApiError::db)?;
            match own {
                Some(id) if id == requested => Ok(id),
                Some(_) => Err(ApiError::Forbidden(
                    "FORBIDDEN",
                    "Dentists can only view their own schedule".into(),
                )),
                None => Err(ApiError::BadRequest(
                    "NO_DENTIST_PROFILE",
                    "Account has no dentist profile".into(),
                )),
            }
        }
        _ => Err(ApiError::Forbidden(
            "FORBIDDEN",
            "You do not have permission to view schedules".into(),
        )),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment).get(list_appointments))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(reschedule_appointment),
        )
        .route("/appointments/{appointment_id}/confirm", post(confirm_appointment))
        .route("/appointments/{appointment_id}/complete", post(complete_appointment))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/no_show", post(no_show_appointment))
}

/* ============================================================
   DTOs
============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub dentist_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// Defaults to start + the configured default duration.
    pub end_time: Option<NaiveTime>,
    pub procedure_type: ProcedureType,
    pub observations: Option<String>,
    pub value_cents: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub dentist_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub dentist_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct AppointmentWithPromotion {
    pub appointment: Appointment,
    /// Waiting patient booked into the slot this change freed.
    pub promoted: Option<Promotion>,
}

impl From<CancelOutcome> for AppointmentWithPromotion {
    fn from(o: CancelOutcome) -> Self {
        Self {
            appointment: o.appointment,
            promoted: o.promoted,
        }
    }
}

impl From<RescheduleOutcome> for AppointmentWithPromotion {
    fn from(o: RescheduleOutcome) -> Self {
        Self {
            appointment: o.appointment,
            promoted: o.promoted,
        }
    }
}

fn resolve_end(
    hours: &OperatingHours,
    start: NaiveTime,
    end: Option<NaiveTime>,
) -> Result<NaiveTime, ApiError> {
    match end {
        Some(e) => Ok(e),
        None => hours
            .default_end(start)
            .ok_or_else(|| ApiError::validation("appointment would run past midnight")),
    }
}

/* ============================================================
   Handlers
============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.require(Role::FRONT_DESK, "book appointments")?;

    let end = resolve_end(state.clinic.hours(), req.start_time, req.end_time)?;
    dentist_routes::ensure_dentist_active(&state, req.dentist_id).await?;
    patient_routes::ensure_patient_bookable(&state, req.patient_id).await?;

    let appointment = state
        .clinic
        .schedule(ScheduleRequest {
            dentist_id: req.dentist_id,
            patient_id: req.patient_id,
            date: req.date,
            start: req.start_time,
            end,
            procedure_type: req.procedure_type,
            observations: req.observations,
            value_cents: req.value_cents,
        })
        .await?;

    Ok(Json(ApiOk::new(appointment)))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.require(Role::STAFF, "read appointments")?;
    let appointment = state.clinic.scheduler().get(appointment_id).await?;
    resolve_dentist_scope(&state, &auth, appointment.dentist_id).await?;
    Ok(Json(ApiOk::new(appointment)))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DayQuery>,
) -> Result<Json<ApiOk<Vec<Appointment>>>, ApiError> {
    let dentist_id = resolve_dentist_scope(&state, &auth, q.dentist_id).await?;
    let rows = state
        .clinic
        .scheduler()
        .day_schedule(dentist_id, q.date)
        .await?;
    Ok(Json(ApiOk::new(rows)))
}

pub async fn reschedule_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentWithPromotion>>, ApiError> {
    auth.require(Role::FRONT_DESK, "reschedule appointments")?;

    let end = resolve_end(state.clinic.hours(), req.start_time, req.end_time)?;
    if let Some(dentist_id) = req.dentist_id {
        dentist_routes::ensure_dentist_active(&state, dentist_id).await?;
    }

    let outcome = state
        .clinic
        .reschedule(appointment_id, req.dentist_id, req.date, req.start_time, end)
        .await?;
    Ok(Json(ApiOk::new(outcome.into())))
}

pub async fn confirm_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.require(Role::FRONT_DESK, "confirm appointments")?;
    Ok(Json(ApiOk::new(state.clinic.confirm(appointment_id).await?)))
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.require(Role::STAFF, "complete appointments")?;
    let current = state.clinic.scheduler().get(appointment_id).await?;
    resolve_dentist_scope(&state, &auth, current.dentist_id).await?;
    Ok(Json(ApiOk::new(state.clinic.complete(appointment_id).await?)))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiOk<AppointmentWithPromotion>>, ApiError> {
    auth.require(Role::FRONT_DESK, "cancel appointments")?;
    let outcome = state.clinic.cancel(appointment_id, &req.reason).await?;
    Ok(Json(ApiOk::new(outcome.into())))
}

pub async fn no_show_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    auth.require(Role::FRONT_DESK, "record no-shows")?;
    Ok(Json(ApiOk::new(state.clinic.mark_no_show(appointment_id).await?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_resolve_end_uses_default_duration() {
        let hours = OperatingHours::default();
        assert_eq!(resolve_end(&hours, t(9, 0), None).unwrap(), t(9, 30));
        assert_eq!(resolve_end(&hours, t(9, 0), Some(t(10, 15))).unwrap(), t(10, 15));
        assert!(resolve_end(&hours, t(23, 50), None).is_err());
    }

    #[test]
    fn test_create_request_shape() {
        let req: CreateAppointmentRequest = serde_json::from_str(
            r#"{
                "dentist_id": "6f1c1c1e-8a5a-4d8e-9a53-2a6e0d0f9b11",
                "patient_id": "0b9f2d59-61a4-4ab4-9d3e-7c0a0c4b0e22",
                "date": "2024-06-01",
                "start_time": "09:00:00",
                "procedure_type": "root_canal"
            }"#,
        )
        .unwrap();
        assert_eq!(req.procedure_type, ProcedureType::RootCanal);
        assert!(req.end_time.is_none());
    }
}
