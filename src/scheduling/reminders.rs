use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{info, instrument, warn};

use super::clock::Clock;
use super::error::SchedulingResult;
use super::notify::{self, Notification, Notifier};
use super::store::AppointmentStore;

/// Day-before reminders for pending appointments.
pub struct ReminderJob {
    store: Arc<dyn AppointmentStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    notify_timeout: Duration,
}

impl ReminderJob {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            notify_timeout,
        }
    }

    /// Returns how many reminders went out. Appointments whose reminder
    /// failed stay unstamped and are retried on the next run.
    #[instrument(skip(self))]
    pub async fn run(&self) -> SchedulingResult<u64> {
        let tomorrow = self.clock.now().date() + ChronoDuration::days(1);
        let due = self.store.due_for_reminder(tomorrow).await?;
        let mut sent = 0;

        for a in due {
            let notification = Notification::reminder(&a);
            match notify::send_with_timeout(self.notifier.as_ref(), &notification, self.notify_timeout)
                .await
            {
                Ok(()) => {
                    self.store
                        .mark_reminded(a.appointment_id, self.clock.now())
                        .await?;
                    sent += 1;
                }
                Err(e) => {
                    warn!(appointment_id = %a.appointment_id, error = %e, "reminder not delivered");
                }
            }
        }

        if sent > 0 {
            info!(sent, date = %tomorrow, "appointment reminders sent");
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::hours::OperatingHours;
    use crate::scheduling::memory::{
        FailingNotifier, FixedClock, MemoryAppointmentStore, RecordingNotifier,
    };
    use crate::scheduling::model::ProcedureType;
    use crate::scheduling::scheduler::{ScheduleRequest, Scheduler};
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn request(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> ScheduleRequest {
        ScheduleRequest {
            dentist_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            date,
            start,
            end,
            procedure_type: ProcedureType::Cleaning,
            observations: None,
            value_cents: None,
        }
    }

    // Monday 2024-06-03 and Tuesday 2024-06-04
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn tuesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
    }

    #[tokio::test]
    async fn test_reminds_tomorrow_once() {
        let clock = Arc::new(FixedClock::at(monday().and_hms_opt(7, 0, 0).unwrap()));
        let store = Arc::new(MemoryAppointmentStore::default());
        let scheduler = Scheduler::new(store.clone(), Arc::new(OperatingHours::default()), clock.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let job = ReminderJob::new(store.clone(), notifier.clone(), clock.clone(), Duration::from_secs(1));

        let today = scheduler.schedule(request(monday(), t(9, 0), t(10, 0))).await.unwrap();
        let tomorrow = scheduler.schedule(request(tuesday(), t(9, 0), t(10, 0))).await.unwrap();
        let cancelled = scheduler.schedule(request(tuesday(), t(14, 0), t(15, 0))).await.unwrap();
        scheduler.cancel(cancelled.appointment_id, "x").await.unwrap();

        assert_eq!(job.run().await.unwrap(), 1);
        assert_eq!(notifier.sent(), vec![Notification::reminder(&tomorrow)]);
        assert!(store.get(today.appointment_id).await.unwrap().unwrap().reminder_sent_at.is_none());
        assert!(store.get(tomorrow.appointment_id).await.unwrap().unwrap().reminder_sent_at.is_some());

        assert_eq!(job.run().await.unwrap(), 0);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reminder_is_retried() {
        let clock = Arc::new(FixedClock::at(monday().and_hms_opt(7, 0, 0).unwrap()));
        let store = Arc::new(MemoryAppointmentStore::default());
        let scheduler = Scheduler::new(store.clone(), Arc::new(OperatingHours::default()), clock.clone());
        let a = scheduler.schedule(request(tuesday(), t(9, 0), t(10, 0))).await.unwrap();

        let failing = ReminderJob::new(store.clone(), Arc::new(FailingNotifier), clock.clone(), Duration::from_secs(1));
        assert_eq!(failing.run().await.unwrap(), 0);
        assert!(store.get(a.appointment_id).await.unwrap().unwrap().reminder_sent_at.is_none());

        let working = ReminderJob::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            clock,
            Duration::from_secs(1),
        );
        assert_eq!(working.run().await.unwrap(), 1);
    }
}
