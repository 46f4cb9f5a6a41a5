use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduling::ClinicService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub clinic: Arc<ClinicService>,
}

/* -------------------------
   Roles
--------------------------*/

/// Stored as smallint in clinic_user.roles:
/// 0 patient, 1 admin, 2 manager, 3 dentist, 4 receptionist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Patient,
    Admin,
    Manager,
    Dentist,
    Receptionist,
}

impl Role {
    /// Front-desk roles: everything around appointments and the waiting list.
    pub const FRONT_DESK: &'static [Role] = &[Role::Admin, Role::Manager, Role::Receptionist];
    /// Any back-office staff member.
    pub const STAFF: &'static [Role] = &[
        Role::Admin,
        Role::Manager,
        Role::Dentist,
        Role::Receptionist,
    ];
    /// Clinical records: plan items and progress notes.
    pub const CLINICAL: &'static [Role] = &[Role::Admin, Role::Manager, Role::Dentist];
    pub const MANAGEMENT: &'static [Role] = &[Role::Admin, Role::Manager];

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Role::Patient),
            1 => Some(Role::Admin),
            2 => Some(Role::Manager),
            3 => Some(Role::Dentist),
            4 => Some(Role::Receptionist),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Role::Patient => 0,
            Role::Admin => 1,
            Role::Manager => 2,
            Role::Dentist => 3,
            Role::Receptionist => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Dentist => "dentist",
            Role::Receptionist => "receptionist",
        }
    }
}

pub fn role_to_string(role: i16) -> String {
    Role::from_i16(role)
        .map(Role::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/* -------------------------
   API DTOs
--------------------------*/

/// `{ "data": ... }` envelope used by every successful response.
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: role_to_string(self.roles),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_codes() {
        for code in 0..=4 {
            let role = Role::from_i16(code).unwrap();
            assert_eq!(role.as_i16(), code);
        }
        assert_eq!(Role::from_i16(9), None);
        assert_eq!(role_to_string(3), "dentist");
        assert_eq!(role_to_string(-1), "unknown");
    }

    #[test]
    fn test_patients_are_not_staff() {
        assert!(!Role::STAFF.contains(&Role::Patient));
        assert!(!Role::FRONT_DESK.contains(&Role::Dentist));
        assert!(Role::CLINICAL.contains(&Role::Dentist));
    }
}
