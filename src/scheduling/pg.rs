use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::error::{SchedulingError, SchedulingResult};
use super::model::{Appointment, AppointmentStatus, NewAppointment, Slot};
use super::store::{self, AppointmentStore, Moved};
use super::waitlist::{self, Claim, NewWaitingEntry, WaitingEntry, WaitingStatus, WaitlistStore};

const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id, dentist_id, patient_id, appointment_date, start_time, end_time,
    procedure_type, status, observations, value_cents, cancel_reason,
    reminder_sent_at, created_at, updated_at
"#;

const ENTRY_COLUMNS: &str = r#"
    entry_id, patient_id, preferred_dentist_id, preferred_date, preferred_start,
    preferred_end, procedure_type, priority, flexible_dentist, flexible_time,
    status, notes, appointment_id, created_at, updated_at
"#;

fn status_codes(statuses: &[AppointmentStatus]) -> Vec<i16> {
    statuses.iter().map(|s| *s as i16).collect()
}

fn entry_status_codes(statuses: &[WaitingStatus]) -> Vec<i16> {
    statuses.iter().map(|s| *s as i16).collect()
}

/* =========================
   Appointments
========================= */

#[derive(Clone)]
pub struct PgAppointmentStore {
    db: PgPool,
}

impl PgAppointmentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Serializes writers touching one dentist's day until the transaction ends.
async fn lock_dentist_day(
    tx: &mut Transaction<'_, Postgres>,
    dentist_id: Uuid,
    date: NaiveDate,
) -> SchedulingResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{dentist_id}:{date}"))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn day_rows(
    tx: &mut Transaction<'_, Postgres>,
    dentist_id: Uuid,
    date: NaiveDate,
) -> SchedulingResult<Vec<Appointment>> {
    let rows = sqlx::query_as::<_, Appointment>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment
         WHERE dentist_id = $1 AND appointment_date = $2"
    ))
    .bind(dentist_id)
    .bind(date)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn get(&self, appointment_id: Uuid) -> SchedulingResult<Option<Appointment>> {
        let row = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1"
        ))
        .bind(appointment_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn insert_if_free(
        &self,
        new: NewAppointment,
        max_per_day: u32,
    ) -> SchedulingResult<Appointment> {
        let mut tx = self.db.begin().await?;
        lock_dentist_day(&mut tx, new.slot.dentist_id, new.slot.date).await?;

        let existing = day_rows(&mut tx, new.slot.dentist_id, new.slot.date).await?;
        store::check_day_capacity(&existing, &new.slot, None, max_per_day)?;

        let row = sqlx::query_as::<_, Appointment>(&format!(
            r#"
            INSERT INTO appointment (
                appointment_id, dentist_id, patient_id, appointment_date,
                start_time, end_time, procedure_type, status, observations,
                value_cents, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.slot.dentist_id)
        .bind(new.patient_id)
        .bind(new.slot.date)
        .bind(new.slot.start)
        .bind(new.slot.end)
        .bind(new.procedure_type)
        .bind(AppointmentStatus::Scheduled)
        .bind(new.observations)
        .bind(new.value_cents)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn move_if_free(
        &self,
        appointment_id: Uuid,
        to: Slot,
        max_per_day: u32,
        allowed: &[AppointmentStatus],
        at: NaiveDateTime,
    ) -> SchedulingResult<Moved> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1 FOR UPDATE"
        ))
        .bind(appointment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SchedulingError::NotFound("appointment".into()))?;

        if !allowed.contains(&current.status) {
            return Err(store::describe_transition_failure(
                current.status,
                AppointmentStatus::Scheduled,
            ));
        }

        lock_dentist_day(&mut tx, to.dentist_id, to.date).await?;
        let existing = day_rows(&mut tx, to.dentist_id, to.date).await?;
        store::check_day_capacity(&existing, &to, Some(appointment_id), max_per_day)?;

        let row = sqlx::query_as::<_, Appointment>(&format!(
            r#"
            UPDATE appointment
            SET dentist_id = $2,
                appointment_date = $3,
                start_time = $4,
                end_time = $5,
                status = $6,
                reminder_sent_at = NULL,
                updated_at = $7
            WHERE appointment_id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(appointment_id)
        .bind(to.dentist_id)
        .bind(to.date)
        .bind(to.start)
        .bind(to.end)
        .bind(AppointmentStatus::Scheduled)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Moved {
            previous: current.slot(),
            appointment: row,
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
        let updated = sqlx::query_as::<_, Appointment>(&format!(
            r#"
            UPDATE appointment
            SET status = $2,
                cancel_reason = COALESCE($3, cancel_reason),
                updated_at = $4
            WHERE appointment_id = $1 AND status = ANY($5)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(appointment_id)
        .bind(to)
        .bind(cancel_reason)
        .bind(at)
        .bind(status_codes(from))
        .fetch_optional(&self.db)
        .await?;

        if let Some(a) = updated {
            return Ok(a);
        }

        // Nothing matched: tell unknown ids apart from wrong-status ones.
        match self.get(appointment_id).await? {
            Some(current) => Err(store::describe_transition_failure(current.status, to)),
            None => Err(SchedulingError::NotFound("appointment".into())),
        }
    }

    async fn day_schedule(
        &self,
        dentist_id: Uuid,
        date: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment
             WHERE dentist_id = $1 AND appointment_date = $2
             ORDER BY start_time ASC, created_at ASC"
        ))
        .bind(dentist_id)
        .bind(date)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn cancelled_between(
        &self,
        from: NaiveDateTime,
        until: NaiveDate,
    ) -> SchedulingResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment
             WHERE status = $1
               AND (appointment_date + start_time) >= $2
               AND appointment_date <= $3
             ORDER BY appointment_date ASC, start_time ASC"
        ))
        .bind(AppointmentStatus::Cancelled)
        .bind(from)
        .bind(until)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn due_for_reminder(&self, date: NaiveDate) -> SchedulingResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment
             WHERE appointment_date = $1
               AND status = ANY($2)
               AND reminder_sent_at IS NULL
             ORDER BY start_time ASC"
        ))
        .bind(date)
        .bind(status_codes(&AppointmentStatus::PENDING))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn mark_reminded(&self, appointment_id: Uuid, at: NaiveDateTime) -> SchedulingResult<()> {
        let res = sqlx::query(
            "UPDATE appointment SET reminder_sent_at = $2 WHERE appointment_id = $1",
        )
        .bind(appointment_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            return Err(SchedulingError::NotFound("appointment".into()));
        }
        Ok(())
    }
}

/// Claim step of `claim_first_match`, inside the caller's transaction.
async fn claim_in(
    tx: &mut Transaction<'_, Postgres>,
    slot: &Slot,
    at: NaiveDateTime,
) -> SchedulingResult<Option<Claim>> {
    // Same rules as `WaitingEntry::accepts`, in queue order. Only the chosen
    // row is locked, so a concurrent claim moves on to the next match.
    let chosen: Option<(Uuid, WaitingStatus)> = sqlx::query_as(
        r#"
        SELECT entry_id, status
        FROM waiting_entry
        WHERE status = ANY($1)
          AND (preferred_dentist_id IS NULL OR flexible_dentist OR preferred_dentist_id = $2)
          AND (
                flexible_time
             OR (    (preferred_date IS NULL OR preferred_date = $3)
                 AND (preferred_start IS NULL OR preferred_start <= $4)
                 AND (preferred_end IS NULL OR preferred_end >= $5))
          )
        ORDER BY priority DESC, created_at ASC, entry_id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(entry_status_codes(&WaitingStatus::OPEN))
    .bind(slot.dentist_id)
    .bind(slot.date)
    .bind(slot.start)
    .bind(slot.end)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((entry_id, previous)) = chosen else {
        return Ok(None);
    };

    let entry = sqlx::query_as::<_, WaitingEntry>(&format!(
        r#"
        UPDATE waiting_entry
        SET status = $2, updated_at = $3
        WHERE entry_id = $1
        RETURNING {ENTRY_COLUMNS}
        "#
    ))
    .bind(entry_id)
    .bind(WaitingStatus::Fulfilled)
    .bind(at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Some(Claim { entry, previous }))
}

/* =========================
   Waiting list
========================= */

#[derive(Clone)]
pub struct PgWaitlistStore {
    db: PgPool,
}

impl PgWaitlistStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WaitlistStore for PgWaitlistStore {
    async fn insert(&self, new: NewWaitingEntry, at: NaiveDateTime) -> SchedulingResult<WaitingEntry> {
        let row = sqlx::query_as::<_, WaitingEntry>(&format!(
            r#"
            INSERT INTO waiting_entry (
                entry_id, patient_id, preferred_dentist_id, preferred_date,
                preferred_start, preferred_end, procedure_type, priority,
                flexible_dentist, flexible_time, status, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.patient_id)
        .bind(new.preferred_dentist_id)
        .bind(new.preferred_date)
        .bind(new.preferred_start)
        .bind(new.preferred_end)
        .bind(new.procedure_type)
        .bind(new.priority)
        .bind(new.flexible_dentist)
        .bind(new.flexible_time)
        .bind(WaitingStatus::Active)
        .bind(new.notes)
        .bind(at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn get(&self, entry_id: Uuid) -> SchedulingResult<Option<WaitingEntry>> {
        let row = sqlx::query_as::<_, WaitingEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waiting_entry WHERE entry_id = $1"
        ))
        .bind(entry_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn list(&self, status: Option<WaitingStatus>) -> SchedulingResult<Vec<WaitingEntry>> {
        let rows = sqlx::query_as::<_, WaitingEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waiting_entry
             WHERE ($1::smallint IS NULL OR status = $1)
             ORDER BY priority DESC, created_at ASC, entry_id ASC"
        ))
        .bind(status.map(|s| s as i16))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn claim_first_match(&self, slot: &Slot, at: NaiveDateTime) -> SchedulingResult<Option<Claim>> {
        let mut tx = self.db.begin().await?;
        let claim = claim_in(&mut tx, slot, at).await?;
        tx.commit().await?;
        Ok(claim)
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        from: &[WaitingStatus],
        to: WaitingStatus,
        at: NaiveDateTime,
    ) -> SchedulingResult<WaitingEntry> {
        let updated = sqlx::query_as::<_, WaitingEntry>(&format!(
            r#"
            UPDATE waiting_entry
            SET status = $2, updated_at = $3
            WHERE entry_id = $1 AND status = ANY($4)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry_id)
        .bind(to)
        .bind(at)
        .bind(entry_status_codes(from))
        .fetch_optional(&self.db)
        .await?;

        if let Some(e) = updated {
            return Ok(e);
        }

        match self.get(entry_id).await? {
            Some(current) => Err(waitlist::describe_transition_failure(current.status, to)),
            None => Err(SchedulingError::NotFound("waiting entry".into())),
        }
    }

    async fn link_appointment(
        &self,
        entry_id: Uuid,
        appointment_id: Uuid,
        at: NaiveDateTime,
    ) -> SchedulingResult<()> {
        let res = sqlx::query(
            "UPDATE waiting_entry SET appointment_id = $2, updated_at = $3 WHERE entry_id = $1",
        )
        .bind(entry_id)
        .bind(appointment_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            return Err(SchedulingError::NotFound("waiting entry".into()));
        }
        Ok(())
    }

    async fn expire_created_before(
        &self,
        cutoff: NaiveDateTime,
        at: NaiveDateTime,
    ) -> SchedulingResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE waiting_entry
            SET status = $1, updated_at = $2
            WHERE status = ANY($3) AND created_at < $4
            "#,
        )
        .bind(WaitingStatus::Expired)
        .bind(at)
        .bind(entry_status_codes(&WaitingStatus::OPEN))
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }
}
