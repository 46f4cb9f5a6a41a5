use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::error::{SchedulingError, SchedulingResult};
use super::model::{Appointment, Slot};
use super::notify::{self, Notification, Notifier};
use super::scheduler::{ScheduleRequest, Scheduler};
use super::waitlist::{WaitingEntry, WaitingList};

/// A waiting entry and the appointment booked for it.
#[derive(Debug, Clone, Serialize)]
pub struct Promotion {
    pub entry: WaitingEntry,
    pub appointment: Appointment,
}

/// Moves waiting patients into freed slots.
pub struct PromotionJob {
    scheduler: Arc<Scheduler>,
    waitlist: Arc<WaitingList>,
    notifier: Arc<dyn Notifier>,
    horizon_days: i64,
    notify_timeout: Duration,
}

impl PromotionJob {
    pub fn new(
        scheduler: Arc<Scheduler>,
        waitlist: Arc<WaitingList>,
        notifier: Arc<dyn Notifier>,
        horizon_days: i64,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            waitlist,
            notifier,
            horizon_days,
            notify_timeout,
        }
    }

    /// Offers `slot` to the waiting list. At most one entry is promoted.
    #[instrument(skip(self, slot), fields(dentist_id = %slot.dentist_id, at = %slot.starts_at()))]
    pub async fn promote_slot(&self, slot: Slot) -> SchedulingResult<Option<Promotion>> {
        if slot.starts_at() < self.scheduler.clock().now() {
            debug!("slot already started; nothing to promote");
            return Ok(None);
        }

        let Some(claim) = self.waitlist.dequeue_match(&slot).await? else {
            debug!("no waiting entry accepts this slot");
            return Ok(None);
        };
        let entry = &claim.entry;

        let request = ScheduleRequest {
            dentist_id: slot.dentist_id,
            patient_id: entry.patient_id,
            date: slot.date,
            start: slot.start,
            end: slot.end,
            procedure_type: entry.procedure_type,
            observations: Some(
                entry
                    .notes
                    .clone()
                    .unwrap_or_else(|| "booked from waiting list".to_string()),
            ),
            value_cents: None,
        };

        let appointment = match self.scheduler.schedule(request).await {
            Ok(a) => a,
            Err(e) => {
                warn!(entry_id = %entry.entry_id, error = %e, "booking claimed entry failed; releasing it");
                if let Err(release_err) = self.waitlist.release(&claim).await {
                    error!(entry_id = %entry.entry_id, error = %release_err, "could not release waiting entry");
                }
                return match e {
                    SchedulingError::Conflict(_) | SchedulingError::Validation(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        if let Err(e) = self
            .waitlist
            .link_appointment(entry.entry_id, appointment.appointment_id)
            .await
        {
            error!(entry_id = %entry.entry_id, error = %e, "could not link appointment to waiting entry");
        }

        let notification = Notification::promoted(&appointment);
        if let Err(e) =
            notify::send_with_timeout(self.notifier.as_ref(), &notification, self.notify_timeout).await
        {
            warn!(patient_id = %appointment.patient_id, error = %e, "promotion notice not delivered; booking kept");
        }

        info!(
            entry_id = %entry.entry_id,
            appointment_id = %appointment.appointment_id,
            "waiting entry promoted"
        );

        Ok(Some(Promotion {
            entry: WaitingEntry {
                appointment_id: Some(appointment.appointment_id),
                ..claim.entry
            },
            appointment,
        }))
    }

    /// Periodic pass over every still-open cancelled slot in the horizon.
    /// Returns how many entries were promoted.
    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> SchedulingResult<u64> {
        let freed = self.scheduler.freed_slots(self.horizon_days).await?;
        let mut promoted = 0;

        for f in freed {
            debug!(cancelled_procedure = ?f.procedure_type, "offering freed slot");
            match self.promote_slot(f.slot).await {
                Ok(Some(_)) => promoted += 1,
                Ok(None) => {}
                Err(e) => error!(error = %e, "promotion attempt failed"),
            }
        }

        if promoted > 0 {
            info!(promoted, "promotion tick finished");
        }
        Ok(promoted)
    }
}
