use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, instrument};
use uuid::Uuid;

use super::clock::Clock;
use super::error::SchedulingResult;
use super::hours::OperatingHours;
use super::jobs::{self, JobGuard};
use super::model::{Appointment, Slot};
use super::notify::Notifier;
use super::promotion::{Promotion, PromotionJob};
use super::reminders::ReminderJob;
use super::scheduler::{ScheduleRequest, Scheduler};
use super::store::AppointmentStore;
use super::waitlist::{NewWaitingEntry, WaitingEntry, WaitingList, WaitlistStore};

/// Thresholds and timer periods for the background jobs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub waitlist_expiry_days: i64,
    pub promotion_horizon_days: i64,
    pub promotion_every: Duration,
    pub expiry_every: Duration,
    pub reminder_every: Duration,
    pub notify_timeout: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            waitlist_expiry_days: 30,
            promotion_horizon_days: 14,
            promotion_every: Duration::from_secs(300),
            expiry_every: Duration::from_secs(3600),
            reminder_every: Duration::from_secs(3600),
            notify_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Promotion,
    Expiry,
    Reminders,
}

impl JobKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "promotion" => Some(JobKind::Promotion),
            "expiry" => Some(JobKind::Expiry),
            "reminders" => Some(JobKind::Reminders),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    pub promoted: Option<Promotion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduleOutcome {
    pub appointment: Appointment,
    pub promoted: Option<Promotion>,
}

/// Entry point the HTTP handlers and timers call into.
pub struct ClinicService {
    scheduler: Arc<Scheduler>,
    waitlist: Arc<WaitingList>,
    promotion: PromotionJob,
    reminders: ReminderJob,
    settings: JobSettings,
    promotion_guard: Arc<JobGuard>,
    expiry_guard: Arc<JobGuard>,
    reminder_guard: Arc<JobGuard>,
}

impl ClinicService {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        waiting: Arc<dyn WaitlistStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        hours: Arc<OperatingHours>,
        settings: JobSettings,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(appointments.clone(), hours, clock.clone()));
        let waitlist = Arc::new(WaitingList::new(waiting, clock.clone()));
        let promotion = PromotionJob::new(
            scheduler.clone(),
            waitlist.clone(),
            notifier.clone(),
            settings.promotion_horizon_days,
            settings.notify_timeout,
        );
        let reminders = ReminderJob::new(appointments, notifier, clock, settings.notify_timeout);

        Self {
            scheduler,
            waitlist,
            promotion,
            reminders,
            settings,
            promotion_guard: Arc::new(JobGuard::new("waitlist_promotion")),
            expiry_guard: Arc::new(JobGuard::new("waitlist_expiry")),
            reminder_guard: Arc::new(JobGuard::new("appointment_reminders")),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn waitlist(&self) -> &WaitingList {
        &self.waitlist
    }

    pub fn hours(&self) -> &OperatingHours {
        self.scheduler.hours()
    }

    pub async fn schedule(&self, req: ScheduleRequest) -> SchedulingResult<Appointment> {
        self.scheduler.schedule(req).await
    }

    /// Cancels, then offers the freed slot to the waiting list. Promotion
    /// problems are logged; the cancellation stands regardless.
    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, appointment_id: Uuid, reason: &str) -> SchedulingResult<CancelOutcome> {
        let appointment = self.scheduler.cancel(appointment_id, reason).await?;
        let promoted = self.offer_slot(&appointment).await;
        Ok(CancelOutcome {
            appointment,
            promoted,
        })
    }

    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        dentist_id: Option<Uuid>,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> SchedulingResult<RescheduleOutcome> {
        let moved = self
            .scheduler
            .reschedule(appointment_id, dentist_id, date, start, end)
            .await?;

        let promoted = match self.scheduler.is_free(&moved.previous).await {
            Ok(true) => self.promote_logged(moved.previous).await,
            Ok(false) => None,
            Err(e) => {
                error!(error = %e, "could not check vacated slot");
                None
            }
        };

        Ok(RescheduleOutcome {
            appointment: moved.appointment,
            promoted,
        })
    }

    pub async fn confirm(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        self.scheduler.confirm(appointment_id).await
    }

    pub async fn complete(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        self.scheduler.complete(appointment_id).await
    }

    pub async fn mark_no_show(&self, appointment_id: Uuid) -> SchedulingResult<Appointment> {
        self.scheduler.mark_no_show(appointment_id).await
    }

    pub async fn enqueue(&self, new: NewWaitingEntry) -> SchedulingResult<WaitingEntry> {
        self.waitlist.enqueue(new).await
    }

    pub async fn expire_older_than(&self, days: i64) -> SchedulingResult<u64> {
        self.waitlist.expire_older_than(days).await
    }

    pub async fn run_promotion_tick(&self) -> SchedulingResult<u64> {
        self.promotion.run_tick().await
    }

    pub async fn run_reminders(&self) -> SchedulingResult<u64> {
        self.reminders.run().await
    }

    /// Manual trigger; honours the same skip-if-running guard as the timer.
    /// `None` means a run was already in progress.
    pub async fn run_job(&self, kind: JobKind) -> Option<SchedulingResult<u64>> {
        match kind {
            JobKind::Promotion => self.promotion_guard.run(|| self.run_promotion_tick()).await,
            JobKind::Expiry => {
                self.expiry_guard
                    .run(|| self.expire_older_than(self.settings.waitlist_expiry_days))
                    .await
            }
            JobKind::Reminders => self.reminder_guard.run(|| self.run_reminders()).await,
        }
    }

    /// Starts the three timer loops.
    pub fn spawn_jobs(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let s = self.clone();
        let promotion = jobs::spawn_periodic(
            self.promotion_guard.clone(),
            self.settings.promotion_every,
            move || {
                let s = s.clone();
                async move { s.run_promotion_tick().await }
            },
        );

        let s = self.clone();
        let expiry = jobs::spawn_periodic(
            self.expiry_guard.clone(),
            self.settings.expiry_every,
            move || {
                let s = s.clone();
                async move { s.expire_older_than(s.settings.waitlist_expiry_days).await }
            },
        );

        let s = self.clone();
        let reminders = jobs::spawn_periodic(
            self.reminder_guard.clone(),
            self.settings.reminder_every,
            move || {
                let s = s.clone();
                async move { s.run_reminders().await }
            },
        );

        vec![promotion, expiry, reminders]
    }

    async fn offer_slot(&self, cancelled: &Appointment) -> Option<Promotion> {
        self.promote_logged(cancelled.slot()).await
    }

    async fn promote_logged(&self, slot: Slot) -> Option<Promotion> {
        match self.promotion.promote_slot(slot).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "waiting-list promotion failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::error::SchedulingError;
    use crate::scheduling::memory::{
        FixedClock, MemoryAppointmentStore, MemoryWaitlistStore, RecordingNotifier,
    };
    use crate::scheduling::model::{AppointmentStatus, ProcedureType};
    use crate::scheduling::waitlist::WaitingStatus;
    use assert_matches::assert_matches;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn june_1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn service() -> ClinicService {
        let clock = Arc::new(FixedClock::at(june_1().and_hms_opt(7, 0, 0).unwrap()));
        ClinicService::new(
            Arc::new(MemoryAppointmentStore::default()),
            Arc::new(MemoryWaitlistStore::default()),
            Arc::new(RecordingNotifier::default()),
            clock,
            Arc::new(OperatingHours::default()),
            JobSettings::default(),
        )
    }

    fn request(dentist_id: Uuid, start: NaiveTime, end: NaiveTime) -> ScheduleRequest {
        ScheduleRequest {
            dentist_id,
            patient_id: Uuid::new_v4(),
            date: june_1(),
            start,
            end,
            procedure_type: ProcedureType::Extraction,
            observations: Some("lower left molar".into()),
            value_cents: Some(30000),
        }
    }

    fn waiting_for(dentist_id: Uuid, priority: i16) -> NewWaitingEntry {
        NewWaitingEntry {
            patient_id: Uuid::new_v4(),
            preferred_dentist_id: Some(dentist_id),
            preferred_date: None,
            preferred_start: None,
            preferred_end: None,
            procedure_type: ProcedureType::Consultation,
            priority,
            flexible_dentist: false,
            flexible_time: true,
            notes: Some("prefers mornings".into()),
        }
    }

    #[tokio::test]
    async fn test_cancel_promotes_waiting_patient() {
        let svc = service();
        let dentist = Uuid::new_v4();
        let entry = svc.enqueue(waiting_for(dentist, 7)).await.unwrap();

        let a = svc.schedule(request(dentist, t(9, 0), t(10, 0))).await.unwrap();
        let outcome = svc.cancel(a.appointment_id, "patient asked").await.unwrap();

        assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
        let promoted = outcome.promoted.unwrap().appointment;
        assert_eq!(promoted.patient_id, entry.patient_id);
        assert_eq!(promoted.slot(), a.slot());
        assert_eq!(promoted.observations.as_deref(), Some("prefers mornings"));

        let stored = svc.waitlist().get(entry.entry_id).await.unwrap();
        assert_eq!(stored.status, WaitingStatus::Fulfilled);
    }

    #[tokio::test]
    async fn test_cancel_without_waiting_list_still_cancels() {
        let svc = service();
        let a = svc
            .schedule(request(Uuid::new_v4(), t(9, 0), t(10, 0)))
            .await
            .unwrap();

        let outcome = svc.cancel(a.appointment_id, "patient asked").await.unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
        assert!(outcome.promoted.is_none());
    }

    #[tokio::test]
    async fn test_reschedule_offers_old_slot() {
        let svc = service();
        let dentist = Uuid::new_v4();
        let entry = svc.enqueue(waiting_for(dentist, 3)).await.unwrap();

        let a = svc.schedule(request(dentist, t(9, 0), t(10, 0))).await.unwrap();
        let outcome = svc
            .reschedule(a.appointment_id, None, june_1(), t(10, 0), t(11, 0))
            .await
            .unwrap();

        assert_eq!(outcome.appointment.start_time, t(10, 0));
        let promoted = outcome.promoted.unwrap().appointment;
        assert_eq!(promoted.patient_id, entry.patient_id);
        assert_eq!(promoted.start_time, t(9, 0));
    }

    #[tokio::test]
    async fn test_errors_surface_unchanged() {
        let svc = service();
        assert_matches!(
            svc.cancel(Uuid::new_v4(), "x").await,
            Err(SchedulingError::NotFound(_))
        );
        assert_matches!(
            svc.schedule(request(Uuid::new_v4(), t(13, 0), t(14, 0))).await,
            Err(SchedulingError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_manual_job_trigger_runs() {
        let svc = service();
        assert_eq!(svc.run_job(JobKind::Expiry).await.unwrap().unwrap(), 0);
        assert_eq!(svc.run_job(JobKind::Promotion).await.unwrap().unwrap(), 0);
        assert_eq!(svc.run_job(JobKind::Reminders).await.unwrap().unwrap(), 0);
        assert_eq!(JobKind::parse("expiry"), Some(JobKind::Expiry));
        assert_eq!(JobKind::parse("backup"), None);
    }
}
