use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{info, instrument};
use uuid::Uuid;

use super::clock::Clock;
use super::error::{SchedulingError, SchedulingResult};
use super::hours::OperatingHours;
use super::model::{Appointment, AppointmentStatus, NewAppointment, ProcedureType, Slot};
use super::store::{AppointmentStore, Moved};

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub dentist_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub procedure_type: ProcedureType,
    pub observations: Option<String>,
    pub value_cents: Option<i32>,
}

impl ScheduleRequest {
    pub fn slot(&self) -> Slot {
        Slot::new(self.dentist_id, self.date, self.start, self.end)
    }
}

/// A cancelled appointment whose time is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreedSlot {
    pub slot: Slot,
    pub procedure_type: ProcedureType,
}

pub struct Scheduler {
    store: Arc<dyn AppointmentStore>,
    hours: Arc<OperatingHours>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        hours: Arc<OperatingHours>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, hours, clock }
    }

    pub fn hours(&self) -> &OperatingHours {
        &self.hours
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn validate_bookable(&self, slot: &Slot) -> SchedulingResult<()> {
        self.hours.validate_slot(slot.date, slot.start, slot.end)?;
        if slot.starts_at() < self.clock.now() {
            return Err(SchedulingError::Validation(
                "cannot book a slot in the past".into(),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, req), fields(dentist_id = %req.dentist_id, date = %req.date))]
    pub async fn schedule(&self, req: ScheduleRequest) -> SchedulingResult<Appointment> {
        let slot = req.slot();
        self.validate_bookable(&slot)?;

        if req.value_cents.is_some_and(|v| v < 0) {
            return Err(SchedulingError::Validation("value must be >= 0".into()));
        }
        let observations = req
            .observations
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let appointment = self
            .store
            .insert_if_free(
                NewAppointment {
                    slot,
                    patient_id: req.patient_id,
                    procedure_type: req.procedure_type,
                    observations,
                    value_cents: req.value_cents,
                    created_at: self.clock.now(),
                },
                self.hours.max_appointments_per_day,
            )
            .await?;

        info!(appointment_id = %appointment.appointment_id, "appointment scheduled");
        Ok(appointment)
    }

    pub async fn get(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        self.store
            .get(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("appointment".into()))
    }

    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, appointment_id: Uuid, reason: &str) -> SchedulingResult<Appointment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SchedulingError::Validation(
                "a cancellation reason is required".into(),
            ));
        }

        let appointment = self
            .store
            .transition(
                appointment_id,
                &AppointmentStatus::PENDING,
                AppointmentStatus::Cancelled,
                Some(reason),
                self.clock.now(),
            )
            .await?;

        info!("appointment cancelled");
        Ok(appointment)
    }

    pub async fn confirm(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        self.store
            .transition(
                appointment_id,
                &[AppointmentStatus::Scheduled],
                AppointmentStatus::Confirmed,
                None,
                self.clock.now(),
            )
            .await
    }

    pub async fn complete(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        let current = self.get(appointment_id).await?;
        if self.clock.now() < current.slot().starts_at() {
            return Err(SchedulingError::State(
                "appointment has not started yet".into(),
            ));
        }

        self.store
            .transition(
                appointment_id,
                &AppointmentStatus::PENDING,
                AppointmentStatus::Completed,
                None,
                self.clock.now(),
            )
            .await
    }

    /// Only once the appointment's end time has passed.
    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        let current = self.get(appointment_id).await?;
        if !AppointmentStatus::PENDING.contains(&current.status) {
            return Err(SchedulingError::State(format!(
                "appointment is {}, cannot become NO_SHOW",
                current.status.as_str()
            )));
        }
        if self.clock.now() < current.slot().ends_at() {
            return Err(SchedulingError::State(
                "appointment has not ended yet".into(),
            ));
        }

        self.store
            .transition(
                appointment_id,
                &AppointmentStatus::PENDING,
                AppointmentStatus::NoShow,
                None,
                self.clock.now(),
            )
            .await
    }

    /// Moves a pending appointment. `dentist_id` of `None` keeps the current
    /// dentist.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        dentist_id: Option<Uuid>,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> SchedulingResult<Moved> {
        let current = self.get(appointment_id).await?;
        let to = Slot::new(dentist_id.unwrap_or(current.dentist_id), date, start, end);
        self.validate_bookable(&to)?;

        let moved = self
            .store
            .move_if_free(
                appointment_id,
                to,
                self.hours.max_appointments_per_day,
                &AppointmentStatus::PENDING,
                self.clock.now(),
            )
            .await?;

        info!(from = %moved.previous.starts_at(), to = %to.starts_at(), "appointment rescheduled");
        Ok(moved)
    }

    pub async fn day_schedule(
        &self,
        dentist_id: Uuid,
        date: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>> {
        self.store.day_schedule(dentist_id, date).await
    }

    /// No slot-occupying appointment overlaps `slot`.
    pub async fn is_free(&self, slot: &Slot) -> SchedulingResult<bool> {
        let day = self.store.day_schedule(slot.dentist_id, slot.date).await?;
        Ok(!day
            .iter()
            .any(|a| a.status.occupies_slot() && slot.overlaps(a.start_time, a.end_time)))
    }

    /// Cancelled, still-open future slots within `horizon_days`, earliest first.
    pub async fn freed_slots(&self, horizon_days: i64) -> SchedulingResult<Vec<FreedSlot>> {
        let now = self.clock.now();
        let until = now.date() + Duration::days(horizon_days);
        let cancelled = self.store.cancelled_between(now, until).await?;

        let mut out: Vec<FreedSlot> = Vec::new();
        for a in cancelled {
            let slot = a.slot();
            if out.iter().any(|f| f.slot == slot) {
                continue;
            }
            if self.is_free(&slot).await? {
                out.push(FreedSlot {
                    slot,
                    procedure_type: a.procedure_type,
                });
            }
        }
        Ok(out)
    }
}
