use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::{
    access::Role,
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    extract::ValidatedJson,
    models::User,
    routes::users::{insert_account, UserResponse},
    schema::users,
    state::AppState,
    utils::validate::not_blank,
};

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    #[validate(email(message = "valid email is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let mut conn = state.db()?;
    let user = insert_account(
        &mut conn,
        &payload.name,
        &payload.email,
        &payload.password,
        Role::Referrer,
        Decimal::ZERO,
    )?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let mut conn = state.db()?;
    let email = payload.email.trim().to_lowercase();

    let user: User = match users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
    {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid {
        return Err(AppError::unauthorized());
    }

    if !user.active {
        warn!(user_id = %user.id, "login attempt for inactive account");
        return Err(AppError::unauthorized());
    }

    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, user.role)
        .map_err(AppError::from)?;

    info!(user_id = %user.id, "user logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let current: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(current.into()))
}
