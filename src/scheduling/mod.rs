//! Appointment scheduling and waiting-list promotion.
//!
//! Everything in here is written against the [`store::AppointmentStore`],
//! [`waitlist::WaitlistStore`], [`clock::Clock`] and [`notify::Notifier`]
//! seams so it runs the same against PostgreSQL ([`pg`]) and against the
//! in-memory doubles used by the unit tests.

pub mod clock;
pub mod error;
pub mod hours;
pub mod jobs;
pub mod model;
pub mod notify;
pub mod pg;
pub mod promotion;
pub mod reminders;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod waitlist;

#[cfg(test)]
pub mod memory;

pub use clock::SystemClock;
pub use error::SchedulingError;
pub use hours::OperatingHours;
pub use model::{Appointment, ProcedureType};
pub use service::ClinicService;
pub use waitlist::{WaitingEntry, WaitingStatus};
