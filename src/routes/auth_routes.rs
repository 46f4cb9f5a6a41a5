use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, validate_new_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        // Rotate the access token of the current session
        .route("/refresh", post(refresh))
        .route("/change_password", post(change_password))
}

pub async fn load_clinic_name(state: &AppState) -> Result<String, ApiError> {
    let clinic_name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT clinic_name
        FROM clinic_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(clinic_name.unwrap_or_else(|| "Dental Clinic".to_string()))
}

fn validate_login(req: &LoginRequest) -> Result<&str, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }
    Ok(username)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginResponseData>>, ApiError> {
    let username = validate_login(&req)?;

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM clinic_user
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }
    // Patients have no back-office access.
    if !matches!(Role::from_i16(user.roles), Some(r) if Role::STAFF.contains(&r)) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Account type not allowed for this login".into(),
        ));
    }
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let clinic_name = load_clinic_name(&state).await?;

    let access_token = generate_access_token();
    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else {
        state.session_ttl_hours
    };
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(hash_access_token(&access_token))
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    info!(user_id = %user.user_id, "user logged in");

    Ok(Json(ApiOk::new(LoginResponseData {
        access_token,
        expires_at: session.expires_at,
        user: user.profile(),
        clinic: ClinicProfile { clinic_name },
    })))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeResponseData>>, ApiError> {
    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM clinic_user
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let clinic_name = load_clinic_name(&state).await?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(MeResponseData {
        user: user.profile(),
        clinic: ClinicProfile { clinic_name },
        session: SessionInfo {
            session_token_id: session.session_token_id,
            expires_at: session.expires_at,
        },
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[derive(Debug, Serialize)]
pub struct RefreshData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_token_id: Uuid,
}

/// The old token stops working immediately; the session id is kept.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<RefreshData>>, ApiError> {
    let new_token = generate_access_token();

    let expires_at: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        UPDATE session_token
        SET session_token_hash = $1,
            last_seen_at = now()
        WHERE session_token_id = $2
          AND user_id = $3
          AND revoked_at IS NULL
          AND expires_at > now()
        RETURNING expires_at
        "#,
    )
    .bind(hash_access_token(&new_token))
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(RefreshData {
        access_token: new_token,
        expires_at: expires_at.ok_or_else(ApiError::session_expired)?,
        session_token_id: auth.session_token_id,
    })))
}

/* =========================
   Password management
========================= */

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

fn validate_change_password(req: &ChangePasswordRequest) -> Result<(), ApiError> {
    if req.old_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::validation(
            "old_password and new_password are required",
        ));
    }
    validate_new_password(&req.new_password).map_err(ApiError::validation)?;
    if req.old_password == req.new_password {
        return Err(ApiError::validation(
            "new_password must differ from old_password",
        ));
    }
    Ok(())
}

/// Also revokes every other session of the user.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    validate_change_password(&req)?;

    let current_hash: String = sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM clinic_user
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &current_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE clinic_user
        SET password_hash = $1, updated_at = now()
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    info!(user_id = %auth.user_id, "password changed");
    Ok(Json(ApiOk::new(OkData { ok: true })))
}
