use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_new_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
};

const USER_COLUMNS: &str = "user_id, username, display_name, roles, is_active, created_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserPublicRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub roles: i16,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct UsersListData {
    pub users: Vec<UserPublicRow>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub roles: i16,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub roles: Option<i16>,
    pub is_active: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{user_id}", get(get_user).patch(update_user))
        .route("/{user_id}/disable", post(disable_user))
        .route("/{user_id}/enable", post(enable_user))
}

fn validate_role(roles: i16) -> Result<(), ApiError> {
    if Role::from_i16(roles).is_none() {
        return Err(ApiError::validation("roles must be one of 0..4"));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let u = username.trim();
    if u.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    if u.chars().count() < 3 {
        return Err(ApiError::validation("username must be at least 3 characters"));
    }
    if u.chars().any(char::is_whitespace) {
        return Err(ApiError::validation("username must not contain spaces"));
    }
    Ok(())
}

fn validate_display_name(display_name: &str) -> Result<(), ApiError> {
    if display_name.trim().is_empty() {
        return Err(ApiError::validation("display_name is required"));
    }
    Ok(())
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<UserPublicRow, ApiError> {
    sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_COLUMNS} FROM clinic_user WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("user"))
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UsersListData>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;

    let users: Vec<UserPublicRow> = sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_COLUMNS} FROM clinic_user ORDER BY created_at DESC LIMIT 200"
    ))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(UsersListData { users })))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;
    Ok(Json(ApiOk::new(load_user(&state, user_id).await?)))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;

    validate_username(&req.username)?;
    validate_display_name(&req.display_name)?;
    validate_new_password(&req.password).map_err(ApiError::validation)?;
    validate_role(req.roles)?;

    let pw_hash = hash_password(req.password.trim()).map_err(ApiError::Internal)?;

    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        INSERT INTO clinic_user (username, display_name, password_hash, roles, is_active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(req.username.trim())
    .bind(req.display_name.trim())
    .bind(&pw_hash)
    .bind(req.roles)
    .bind(req.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::db_unique(e, "username already taken"))?;

    info!(user_id = %user.user_id, created_by = %auth.user_id, "user created");
    Ok(Json(ApiOk::new(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;

    let existing = load_user(&state, user_id).await?;

    let display_name = match req.display_name.as_deref() {
        Some(s) => {
            validate_display_name(s)?;
            s.trim().to_string()
        }
        None => existing.display_name,
    };
    let roles = match req.roles {
        Some(r) => {
            validate_role(r)?;
            r
        }
        None => existing.roles,
    };
    let is_active = req.is_active.unwrap_or(existing.is_active);

    let updated: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        UPDATE clinic_user
        SET display_name = $1,
            roles = $2,
            is_active = $3,
            updated_at = now()
        WHERE user_id = $4
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(&display_name)
    .bind(roles)
    .bind(is_active)
    .bind(user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(updated)))
}

async fn set_active(state: &AppState, user_id: Uuid, active: bool) -> Result<(), ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE clinic_user
        SET is_active = $2, updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(active)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("user"));
    }

    if !active {
        // A disabled account loses its open sessions too.
        sqlx::query(
            "UPDATE session_token SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
    }
    Ok(())
}

pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;
    if user_id == auth.user_id {
        return Err(ApiError::validation("you cannot disable your own account"));
    }
    set_active(&state, user_id, false).await?;
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::MANAGEMENT, "manage users")?;
    set_active(&state, user_id, true).await?;
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_role_bounds() {
        assert!(validate_role(0).is_ok());
        assert!(validate_role(3).is_ok());
        assert!(validate_role(4).is_ok());

        assert!(validate_role(-1).is_err());
        assert!(validate_role(5).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("reception").is_ok());
        assert!(validate_username("dr").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("front desk").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Dr. Ana Souza").is_ok());
        assert!(validate_display_name(" ").is_err());
    }
}
