use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::scheduling::hours::{DayHours, OperatingHours, TimeWindow};
use crate::scheduling::service::JobSettings;

#[derive(Clone, Debug)]
pub struct DbSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db: DbSettings,
    pub hours: OperatingHours,
    pub jobs: JobSettings,
}

/// Unset or blank means `default`; anything else must parse.
fn parse_or<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v.parse::<T>().map_err(|e| anyhow!("{key}: {e}")),
        _ => Ok(default),
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    parse_or(key, env::var(key).ok().as_deref(), default)
}

fn parse_session_ttl(raw: Option<&str>) -> anyhow::Result<i64> {
    let hours: i64 = parse_or("SESSION_TTL_HOURS", raw, 24)?;
    if hours <= 0 {
        return Err(anyhow!("SESSION_TTL_HOURS must be > 0"));
    }
    Ok(hours)
}

fn window_or(key: &str, default: Option<TimeWindow>) -> anyhow::Result<Option<TimeWindow>> {
    match env::var(key) {
        Ok(raw) => TimeWindow::parse(&raw).map_err(|e| anyhow!("{key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn hours_from_env() -> anyhow::Result<OperatingHours> {
    let defaults = OperatingHours::default();
    let monday = &defaults.days[0];
    let saturday = &defaults.days[5];

    let weekday = DayHours {
        morning: window_or("CLINIC_WEEKDAY_MORNING", monday.morning)?,
        afternoon: window_or("CLINIC_WEEKDAY_AFTERNOON", monday.afternoon)?,
    };
    let sat = DayHours {
        morning: window_or("CLINIC_SATURDAY_MORNING", saturday.morning)?,
        afternoon: window_or("CLINIC_SATURDAY_AFTERNOON", saturday.afternoon)?,
    };

    let hours = OperatingHours {
        days: [
            weekday,
            weekday,
            weekday,
            weekday,
            weekday,
            sat,
            DayHours::default(),
        ],
        min_duration_minutes: var_or("APPOINTMENT_MIN_MINUTES", defaults.min_duration_minutes)?,
        max_duration_minutes: var_or("APPOINTMENT_MAX_MINUTES", defaults.max_duration_minutes)?,
        default_duration_minutes: var_or(
            "APPOINTMENT_DEFAULT_MINUTES",
            defaults.default_duration_minutes,
        )?,
        max_appointments_per_day: var_or(
            "MAX_APPOINTMENTS_PER_DAY",
            defaults.max_appointments_per_day,
        )?,
    };

    if hours.min_duration_minutes <= 0 || hours.min_duration_minutes > hours.max_duration_minutes {
        return Err(anyhow!(
            "APPOINTMENT_MIN_MINUTES must be > 0 and <= APPOINTMENT_MAX_MINUTES"
        ));
    }
    if hours.max_appointments_per_day == 0 {
        return Err(anyhow!("MAX_APPOINTMENTS_PER_DAY must be > 0"));
    }
    Ok(hours)
}

fn jobs_from_env() -> anyhow::Result<JobSettings> {
    let d = JobSettings::default();
    let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
        let n: u64 = var_or(key, default.as_secs())?;
        if n == 0 {
            return Err(anyhow!("{key} must be > 0"));
        }
        Ok(Duration::from_secs(n))
    };

    let settings = JobSettings {
        waitlist_expiry_days: var_or("WAITLIST_EXPIRY_DAYS", d.waitlist_expiry_days)?,
        promotion_horizon_days: var_or("PROMOTION_HORIZON_DAYS", d.promotion_horizon_days)?,
        promotion_every: secs("PROMOTION_INTERVAL_SECS", d.promotion_every)?,
        expiry_every: secs("EXPIRY_INTERVAL_SECS", d.expiry_every)?,
        reminder_every: secs("REMINDER_INTERVAL_SECS", d.reminder_every)?,
        notify_timeout: secs("NOTIFY_TIMEOUT_SECS", d.notify_timeout)?,
    };

    if settings.waitlist_expiry_days < 0 || settings.promotion_horizon_days < 0 {
        return Err(anyhow!(
            "WAITLIST_EXPIRY_DAYS and PROMOTION_HORIZON_DAYS must be >= 0"
        ));
    }
    Ok(settings)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = parse_session_ttl(env::var("SESSION_TTL_HOURS").ok().as_deref())?;

        let db = DbSettings {
            max_connections: var_or("DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout: Duration::from_secs(var_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?),
            statement_timeout_ms: var_or("DB_STATEMENT_TIMEOUT_MS", 5000)?,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            db,
            hours: hours_from_env()?,
            jobs: jobs_from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_defaults_only_when_unset() {
        assert_eq!(parse_or::<u32>("DB_MAX_CONNECTIONS", None, 10).unwrap(), 10);
        assert_eq!(parse_or::<u32>("DB_MAX_CONNECTIONS", Some("  "), 10).unwrap(), 10);
        assert_eq!(parse_or::<u32>("DB_MAX_CONNECTIONS", Some(" 25 "), 10).unwrap(), 25);

        let err = parse_or::<u32>("DB_MAX_CONNECTIONS", Some("lots"), 10).unwrap_err();
        assert!(err.to_string().starts_with("DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn test_session_ttl_rejects_bad_values() {
        assert_eq!(parse_session_ttl(None).unwrap(), 24);
        assert_eq!(parse_session_ttl(Some("72")).unwrap(), 72);
        assert!(parse_session_ttl(Some("a day")).is_err());
        assert!(parse_session_ttl(Some("0")).is_err());
        assert!(parse_session_ttl(Some("-5")).is_err());
    }
}
