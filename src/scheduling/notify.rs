use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::model::Appointment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    WaitlistPromoted {
        patient_id: Uuid,
        appointment_id: Uuid,
        dentist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    },
    AppointmentReminder {
        patient_id: Uuid,
        appointment_id: Uuid,
        dentist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
    },
}

impl Notification {
    pub fn promoted(a: &Appointment) -> Self {
        Notification::WaitlistPromoted {
            patient_id: a.patient_id,
            appointment_id: a.appointment_id,
            dentist_id: a.dentist_id,
            date: a.appointment_date,
            start_time: a.start_time,
        }
    }

    pub fn reminder(a: &Appointment) -> Self {
        Notification::AppointmentReminder {
            patient_id: a.patient_id,
            appointment_id: a.appointment_id,
            dentist_id: a.dentist_id,
            date: a.appointment_date,
            start_time: a.start_time,
        }
    }

    pub fn patient_id(&self) -> Uuid {
        match self {
            Notification::WaitlistPromoted { patient_id, .. }
            | Notification::AppointmentReminder { patient_id, .. } => *patient_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::WaitlistPromoted { .. } => "waitlist_promoted",
            Notification::AppointmentReminder { .. } => "appointment_reminder",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),

    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// Hands a notification to whatever delivers email/SMS.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub async fn send_with_timeout(
    notifier: &dyn Notifier,
    notification: &Notification,
    limit: Duration,
) -> Result<(), NotifyError> {
    match tokio::time::timeout(limit, notifier.send(notification)).await {
        Ok(res) => res,
        Err(_) => Err(NotifyError::Timeout(limit)),
    }
}

/// Writes notifications to `notification_outbox`; the email/SMS gateway
/// drains that table on its own schedule.
#[derive(Clone)]
pub struct OutboxNotifier {
    db: PgPool,
}

impl OutboxNotifier {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_value(notification)
            .map_err(|e| NotifyError::Dispatch(format!("encode error: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO notification_outbox (patient_id, kind, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(notification.patient_id())
        .bind(notification.kind())
        .bind(payload)
        .execute(&self.db)
        .await
        .map_err(|e| NotifyError::Dispatch(format!("db error: {e}")))?;

        Ok(())
    }
}
