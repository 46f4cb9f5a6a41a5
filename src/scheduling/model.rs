use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored as smallint:
/// 0 scheduled, 1 confirmed, 2 completed, 3 cancelled, 4 no-show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum AppointmentStatus {
    Scheduled = 0,
    Confirmed = 1,
    Completed = 2,
    Cancelled = 3,
    NoShow = 4,
}

impl AppointmentStatus {
    /// Still expected to happen (cancel / confirm / reschedule allowed).
    pub const PENDING: [AppointmentStatus; 2] =
        [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

    /// Every status except CANCELLED keeps its slot occupied.
    pub fn occupies_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ProcedureType {
    Consultation = 0,
    Cleaning = 1,
    Filling = 2,
    Extraction = 3,
    RootCanal = 4,
    Orthodontics = 5,
    Prosthesis = 6,
    Whitening = 7,
    Emergency = 8,
    Other = 9,
}

/// Bookable time for one dentist: `[start, end)` on `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub dentist_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    pub fn new(dentist_id: Uuid, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { dentist_id, date, start, end }
    }

    /// Half-open interval test: `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start < end && start < self.end
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub dentist_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub procedure_type: ProcedureType,
    pub status: AppointmentStatus,
    pub observations: Option<String>,
    pub value_cents: Option<i32>,
    pub cancel_reason: Option<String>,
    pub reminder_sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn slot(&self) -> Slot {
        Slot::new(self.dentist_id, self.appointment_date, self.start_time, self.end_time)
    }
}

/// Everything the store needs to insert a SCHEDULED appointment.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub slot: Slot,
    pub patient_id: Uuid,
    pub procedure_type: ProcedureType,
    pub observations: Option<String>,
    pub value_cents: Option<i32>,
    pub created_at: NaiveDateTime,
}
