use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::Serialize;

use super::error::SchedulingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parses `"HH:MM-HH:MM"`. An empty string means "closed" and yields `None`.
    pub fn parse(raw: &str) -> Result<Option<Self>, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("closed") {
            return Ok(None);
        }

        let (a, b) = raw
            .split_once('-')
            .ok_or_else(|| format!("window '{raw}' must look like HH:MM-HH:MM"))?;
        let start = NaiveTime::parse_from_str(a.trim(), "%H:%M")
            .map_err(|_| format!("bad window start '{a}'"))?;
        let end = NaiveTime::parse_from_str(b.trim(), "%H:%M")
            .map_err(|_| format!("bad window end '{b}'"))?;
        if start >= end {
            return Err(format!("window '{raw}' must end after it starts"));
        }
        Ok(Some(Self { start, end }))
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start <= start && end <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayHours {
    pub morning: Option<TimeWindow>,
    pub afternoon: Option<TimeWindow>,
}

impl DayHours {
    pub fn windows(&self) -> impl Iterator<Item = &TimeWindow> {
        self.morning.iter().chain(self.afternoon.iter())
    }

    pub fn is_closed(&self) -> bool {
        self.morning.is_none() && self.afternoon.is_none()
    }
}

/// Clinic operating hours and booking limits. Built once at startup and
/// shared read-only.
#[derive(Debug, Clone, Serialize)]
pub struct OperatingHours {
    /// Indexed Monday = 0 .. Sunday = 6.
    pub days: [DayHours; 7],
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub default_duration_minutes: i64,
    pub max_appointments_per_day: u32,
}

impl OperatingHours {
    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// A slot must sit inside a single window; it may not span the lunch break.
    pub fn validate_slot(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<(), SchedulingError> {
        if start >= end {
            return Err(SchedulingError::Validation(
                "start time must be before end time".into(),
            ));
        }

        let minutes = (end - start).num_minutes();
        if minutes < self.min_duration_minutes {
            return Err(SchedulingError::Validation(format!(
                "appointment must last at least {} minutes",
                self.min_duration_minutes
            )));
        }
        if minutes > self.max_duration_minutes {
            return Err(SchedulingError::Validation(format!(
                "appointment must last at most {} minutes",
                self.max_duration_minutes
            )));
        }

        let day = self.day(date.weekday());
        if day.is_closed() {
            return Err(SchedulingError::Validation(format!(
                "clinic is closed on {}",
                date.weekday()
            )));
        }
        if !day.windows().any(|w| w.contains(start, end)) {
            return Err(SchedulingError::Validation(format!(
                "{}-{} is outside operating hours",
                start.format("%H:%M"),
                end.format("%H:%M")
            )));
        }

        Ok(())
    }

    /// End time for a booking that only gave a start. `None` if it would roll
    /// past midnight.
    pub fn default_end(&self, start: NaiveTime) -> Option<NaiveTime> {
        let (end, wrapped) =
            start.overflowing_add_signed(Duration::minutes(self.default_duration_minutes));
        (wrapped == 0).then_some(end)
    }
}

impl Default for OperatingHours {
    fn default() -> Self {
        let window = |a: (u32, u32), b: (u32, u32)| {
            Some(TimeWindow {
                start: NaiveTime::from_hms_opt(a.0, a.1, 0).unwrap_or_default(),
                end: NaiveTime::from_hms_opt(b.0, b.1, 0).unwrap_or_default(),
            })
        };
        let weekday = DayHours {
            morning: window((8, 0), (12, 0)),
            afternoon: window((13, 0), (18, 0)),
        };
        let saturday = DayHours {
            morning: window((8, 0), (12, 0)),
            afternoon: None,
        };

        Self {
            days: [
                weekday,
                weekday,
                weekday,
                weekday,
                weekday,
                saturday,
                DayHours::default(),
            ],
            min_duration_minutes: 15,
            max_duration_minutes: 240,
            default_duration_minutes: 30,
            max_appointments_per_day: 16,
        }
    }
}
