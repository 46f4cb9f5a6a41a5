use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::error::{SchedulingError, SchedulingResult};
use super::model::{Appointment, AppointmentStatus, NewAppointment, Slot};

/// Result of moving an appointment to a new slot.
#[derive(Debug, Clone)]
pub struct Moved {
    pub previous: Slot,
    pub appointment: Appointment,
}

/// Persistence for appointments.
///
/// `insert_if_free` and `move_if_free` must run the capacity check and the
/// write as one serialized step per (dentist, date); implementations are
/// expected to call [`check_day_capacity`] while holding that serialization.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, appointment_id: Uuid) -> SchedulingResult<Option<Appointment>>;

    async fn insert_if_free(
        &self,
        new: NewAppointment,
        max_per_day: u32,
    ) -> SchedulingResult<Appointment>;

    /// Only appointments currently in `allowed` may move. The moved
    /// appointment goes back to SCHEDULED with its reminder cleared.
    async fn move_if_free(
        &self,
        appointment_id: Uuid,
        to: Slot,
        max_per_day: u32,
        allowed: &[AppointmentStatus],
        at: NaiveDateTime,
    ) -> SchedulingResult<Moved>;

    /// Conditional status change. Fails with `NotFound` for an unknown id and
    /// `State` when the current status is not in `from`.
    async fn transition(
        &self,
        appointment_id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        cancel_reason: Option<&str>,
        at: NaiveDateTime,
    ) -> SchedulingResult<Appointment>;

    /// Every appointment of the dentist on that date, any status, by start time.
    async fn day_schedule(
        &self,
        dentist_id: Uuid,
        date: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>>;

    /// CANCELLED appointments starting at or after `from`, dated up to `until`.
    async fn cancelled_between(
        &self,
        from: NaiveDateTime,
        until: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>>;

    /// SCHEDULED/CONFIRMED appointments on `date` with no reminder sent yet.
    async fn due_for_reminder(&self, date: NaiveDate) -> SchedulingResult<Vec<Appointment>>;

    async fn mark_reminded(&self, appointment_id: Uuid, at: NaiveDateTime) -> SchedulingResult<()>;
}

/// Rejects `candidate` if it overlaps any slot-occupying appointment in
/// `existing` or if the dentist's day is already full. `ignore` excludes the
/// appointment being moved.
pub fn check_day_capacity(
    existing: &[Appointment],
    candidate: &Slot,
    ignore: Option<Uuid>,
    max_per_day: u32,
) -> SchedulingResult<()> {
    let mut occupied = 0u32;

    for a in existing {
        if Some(a.appointment_id) == ignore || !a.status.occupies_slot() {
            continue;
        }
        if a.dentist_id != candidate.dentist_id || a.appointment_date != candidate.date {
            continue;
        }
        if candidate.overlaps(a.start_time, a.end_time) {
            return Err(SchedulingError::Conflict(format!(
                "dentist already booked {}-{} on {}",
                a.start_time.format("%H:%M"),
                a.end_time.format("%H:%M"),
                a.appointment_date
            )));
        }
        occupied += 1;
    }

    if occupied >= max_per_day {
        return Err(SchedulingError::Conflict(format!(
            "dentist already has {max_per_day} appointments on {}",
            candidate.date
        )));
    }

    Ok(())
}

pub(crate) fn describe_transition_failure(
    current: AppointmentStatus,
    to: AppointmentStatus,
) -> SchedulingError {
    SchedulingError::State(format!(
        "appointment is {}, cannot become {}",
        current.as_str(),
        to.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::model::ProcedureType;
    use assert_matches::assert_matches;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn booked(dentist: Uuid, start: NaiveTime, end: NaiveTime, status: AppointmentStatus) -> Appointment {
        let now = date().and_hms_opt(7, 0, 0).unwrap();
        Appointment {
            appointment_id: Uuid::new_v4(),
            dentist_id: dentist,
            patient_id: Uuid::new_v4(),
            appointment_date: date(),
            start_time: start,
            end_time: end,
            procedure_type: ProcedureType::Cleaning,
            status,
            observations: None,
            value_cents: None,
            cancel_reason: None,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overlap_conflicts() {
        let d = Uuid::new_v4();
        let existing = vec![booked(d, t(9, 0), t(10, 0), AppointmentStatus::Scheduled)];

        assert_matches!(
            check_day_capacity(&existing, &Slot::new(d, date(), t(9, 30), t(10, 30)), None, 16),
            Err(SchedulingError::Conflict(_))
        );
        assert!(check_day_capacity(&existing, &Slot::new(d, date(), t(10, 0), t(11, 0)), None, 16).is_ok());
    }

    #[test]
    fn test_cancelled_and_other_dentists_ignored() {
        let d = Uuid::new_v4();
        let other = Uuid::new_v4();
        let existing = vec![
            booked(d, t(9, 0), t(10, 0), AppointmentStatus::Cancelled),
            booked(other, t(9, 0), t(10, 0), AppointmentStatus::Confirmed),
        ];

        assert!(check_day_capacity(&existing, &Slot::new(d, date(), t(9, 0), t(10, 0)), None, 16).is_ok());
    }

    #[test]
    fn test_moving_appointment_ignores_itself() {
        let d = Uuid::new_v4();
        let existing = vec![booked(d, t(9, 0), t(10, 0), AppointmentStatus::Scheduled)];
        let id = existing[0].appointment_id;

        assert!(
            check_day_capacity(&existing, &Slot::new(d, date(), t(9, 30), t(10, 30)), Some(id), 16)
                .is_ok()
        );
    }

    #[test]
    fn test_daily_limit() {
        let d = Uuid::new_v4();
        let existing = vec![
            booked(d, t(8, 0), t(9, 0), AppointmentStatus::Scheduled),
            booked(d, t(9, 0), t(10, 0), AppointmentStatus::NoShow),
        ];

        assert_matches!(
            check_day_capacity(&existing, &Slot::new(d, date(), t(10, 0), t(11, 0)), None, 2),
            Err(SchedulingError::Conflict(_))
        );
        assert!(check_day_capacity(&existing, &Slot::new(d, date(), t(10, 0), t(11, 0)), None, 3).is_ok());
    }
}
