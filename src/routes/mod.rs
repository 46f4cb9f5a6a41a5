use crate::models::AppState;
use axum::Router;
use serde::de::{Deserialize, Deserializer};

use crate::error::ApiError;

pub mod appointment_routes;
pub mod auth_routes;
pub mod clinic_routes;
pub mod dentist_routes;
pub mod job_routes;
pub mod patient_routes;
pub mod plan_routes;
pub mod progress_routes;
pub mod user_routes;
pub mod waitlist_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1", clinic_routes::router())
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", dentist_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", plan_routes::router())
        .nest("/api/v1", progress_routes::router())
        .nest("/api/v1", waitlist_routes::router())
        .nest("/api/v1", job_routes::router())
        .with_state(state)
}

/// PATCH fields: absent => `None`, `null` => `Some(None)`, value => `Some(Some(v))`.
pub(crate) fn deserialize_double_option<'de, D, T>(
    deserializer: D,
) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // only called when the field is present
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims; blank becomes `None`.
pub(crate) fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    let ok = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !ok || email.chars().any(char::is_whitespace) {
        return Err(ApiError::validation(format!("'{email}' is not a valid email")));
    }
    Ok(())
}
