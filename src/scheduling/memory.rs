//! In-memory doubles for the scheduling seams. Test builds only.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::clock::Clock;
use super::error::{SchedulingError, SchedulingResult};
use super::model::{Appointment, AppointmentStatus, NewAppointment, Slot};
use super::notify::{Notification, Notifier, NotifyError};
use super::store::{self, AppointmentStore, Moved};
use super::waitlist::{self, Claim, NewWaitingEntry, WaitingEntry, WaitingStatus, WaitlistStore};

pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

/// One mutex over the whole map stands in for the per-(dentist, date) lock.
#[derive(Default)]
pub struct MemoryAppointmentStore {
    rows: Mutex<HashMap<Uuid, Appointment>>,
}

impl MemoryAppointmentStore {
    pub fn all(&self) -> Vec<Appointment> {
        self.rows.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn get(&self, appointment_id: Uuid) -> SchedulingResult<Option<Appointment>> {
        Ok(self.rows.lock().unwrap().get(&appointment_id).cloned())
    }

    async fn insert_if_free(
        &self,
        new: NewAppointment,
        max_per_day: u32,
    ) -> SchedulingResult<Appointment> {
        let mut rows = self.rows.lock().unwrap();
        let existing: Vec<Appointment> = rows.values().cloned().collect();
        store::check_day_capacity(&existing, &new.slot, None, max_per_day)?;

        let a = Appointment {
            appointment_id: Uuid::new_v4(),
            dentist_id: new.slot.dentist_id,
            patient_id: new.patient_id,
            appointment_date: new.slot.date,
            start_time: new.slot.start,
            end_time: new.slot.end,
            procedure_type: new.procedure_type,
            status: AppointmentStatus::Scheduled,
            observations: new.observations,
            value_cents: new.value_cents,
            cancel_reason: None,
            reminder_sent_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        rows.insert(a.appointment_id, a.clone());
        Ok(a)
    }

    async fn move_if_free(
        &self,
        appointment_id: Uuid,
        to: Slot,
        max_per_day: u32,
        allowed: &[AppointmentStatus],
        at: NaiveDateTime,
    ) -> SchedulingResult<Moved> {
        let mut rows = self.rows.lock().unwrap();
        let current = rows
            .get(&appointment_id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound("appointment".into()))?;
        if !allowed.contains(&current.status) {
            return Err(store::describe_transition_failure(
                current.status,
                AppointmentStatus::Scheduled,
            ));
        }

        let existing: Vec<Appointment> = rows.values().cloned().collect();
        store::check_day_capacity(&existing, &to, Some(appointment_id), max_per_day)?;

        let previous = current.slot();
        let a = rows
            .get_mut(&appointment_id)
            .ok_or_else(|| SchedulingError::NotFound("appointment".into()))?;
        a.dentist_id = to.dentist_id;
        a.appointment_date = to.date;
        a.start_time = to.start;
        a.end_time = to.end;
        a.status = AppointmentStatus::Scheduled;
        a.reminder_sent_at = None;
        a.updated_at = at;

        Ok(Moved {
            previous,
            appointment: a.clone(),
        })
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
        cancel_reason: Option<&str>,
        at: NaiveDateTime,
    ) -> SchedulingResult<Appointment> {
        let mut rows = self.rows.lock().unwrap();
        let a = rows
            .get_mut(&appointment_id)
            .ok_or_else(|| SchedulingError::NotFound("appointment".into()))?;
        if !from.contains(&a.status) {
            return Err(store::describe_transition_failure(a.status, to));
        }
        a.status = to;
        if let Some(reason) = cancel_reason {
            a.cancel_reason = Some(reason.to_string());
        }
        a.updated_at = at;
        Ok(a.clone())
    }

    async fn day_schedule(
        &self,
        dentist_id: Uuid,
        date: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>> {
        let mut out: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.dentist_id == dentist_id && a.appointment_date == date)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.start_time, a.created_at));
        Ok(out)
    }

    async fn cancelled_between(
        &self,
        from: NaiveDateTime,
        until: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>> {
        let mut out: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::Cancelled
                    && a.slot().starts_at() >= from
                    && a.appointment_date <= until
            })
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.appointment_date, a.start_time));
        Ok(out)
    }

    async fn due_for_reminder(&self, date: NaiveDate) -> SchedulingResult<Vec<Appointment>> {
        let mut out: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| {
                a.appointment_date == date
                    && AppointmentStatus::PENDING.contains(&a.status)
                    && a.reminder_sent_at.is_none()
            })
            .cloned()
            .collect();
        out.sort_by_key(|a| a.start_time);
        Ok(out)
    }

    async fn mark_reminded(&self, appointment_id: Uuid, at: NaiveDateTime) -> SchedulingResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let a = rows
            .get_mut(&appointment_id)
            .ok_or_else(|| SchedulingError::NotFound("appointment".into()))?;
        a.reminder_sent_at = Some(at);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWaitlistStore {
    rows: Mutex<HashMap<Uuid, WaitingEntry>>,
}

#[async_trait]
impl WaitlistStore for MemoryWaitlistStore {
    async fn insert(&self, new: NewWaitingEntry, at: NaiveDateTime) -> SchedulingResult<WaitingEntry> {
        let e = WaitingEntry {
            entry_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            preferred_dentist_id: new.preferred_dentist_id,
            preferred_date: new.preferred_date,
            preferred_start: new.preferred_start,
            preferred_end: new.preferred_end,
            procedure_type: new.procedure_type,
            priority: new.priority,
            flexible_dentist: new.flexible_dentist,
            flexible_time: new.flexible_time,
            status: WaitingStatus::Active,
            notes: new.notes,
            appointment_id: None,
            created_at: at,
            updated_at: at,
        };
        self.rows.lock().unwrap().insert(e.entry_id, e.clone());
        Ok(e)
    }

    async fn get(&self, entry_id: Uuid) -> SchedulingResult<Option<WaitingEntry>> {
        Ok(self.rows.lock().unwrap().get(&entry_id).cloned())
    }

    async fn list(&self, status: Option<WaitingStatus>) -> SchedulingResult<Vec<WaitingEntry>> {
        let mut out: Vec<WaitingEntry> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        out.sort_by(waitlist::queue_order);
        Ok(out)
    }

    async fn claim_first_match(&self, slot: &Slot, at: NaiveDateTime) -> SchedulingResult<Option<Claim>> {
        let mut rows = self.rows.lock().unwrap();
        let mut open: Vec<&WaitingEntry> = rows.values().filter(|e| WaitingStatus::OPEN.contains(&e.status)).collect();
        open.sort_by(|a, b| waitlist::queue_order(a, b));

        let Some(id) = open.into_iter().find(|e| e.accepts(slot)).map(|e| e.entry_id) else {
            return Ok(None);
        };

        let e = rows
            .get_mut(&id)
            .ok_or_else(|| SchedulingError::NotFound("waiting entry".into()))?;
        let previous = e.status;
        e.status = WaitingStatus::Fulfilled;
        e.updated_at = at;
        Ok(Some(Claim {
            entry: e.clone(),
            previous,
        }))
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        from: &[WaitingStatus],
        to: WaitingStatus,
        at: NaiveDateTime,
    ) -> SchedulingResult<WaitingEntry> {
        let mut rows = self.rows.lock().unwrap();
        let e = rows
            .get_mut(&entry_id)
            .ok_or_else(|| SchedulingError::NotFound("waiting entry".into()))?;
        if !from.contains(&e.status) {
            return Err(waitlist::describe_transition_failure(e.status, to));
        }
        e.status = to;
        e.updated_at = at;
        Ok(e.clone())
    }

    async fn link_appointment(
        &self,
        entry_id: Uuid,
        appointment_id: Uuid,
        at: NaiveDateTime,
    ) -> SchedulingResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let e = rows
            .get_mut(&entry_id)
            .ok_or_else(|| SchedulingError::NotFound("waiting entry".into()))?;
        e.appointment_id = Some(appointment_id);
        e.updated_at = at;
        Ok(())
    }

    async fn expire_created_before(
        &self,
        cutoff: NaiveDateTime,
        at: NaiveDateTime,
    ) -> SchedulingResult<u64> {
        let mut n = 0;
        for e in self.rows.lock().unwrap().values_mut() {
            if WaitingStatus::OPEN.contains(&e.status) && e.created_at < cutoff {
                e.status = WaitingStatus::Expired;
                e.updated_at = at;
                n += 1;
            }
        }
        Ok(n)
    }
}

/// Records every notification it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Dispatch("gateway unavailable".into()))
    }
}

/// Never answers; exercises the notification timeout.
pub struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        Ok(())
    }
}
