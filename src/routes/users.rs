use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::access::{writable_patch, Entity, Role};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::ledger::validate_rate;
use crate::models::{NewUser, User};
use crate::schema::{documents, users};
use crate::state::AppState;
use crate::utils::json::patch_required;
use crate::utils::validate::{normalize_email, not_blank};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub commission_rate: Decimal,
    pub total_commission_earned: Decimal,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            commission_rate: user.commission_rate,
            total_commission_earned: user.total_commission_earned,
            active: user.active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// The `{id, name, email}` view embedded in leads, documents and commissions.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

pub(crate) fn load_summaries(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<std::collections::HashMap<Uuid, UserSummary>> {
    if ids.is_empty() {
        return Ok(Default::default());
    }
    let rows: Vec<User> = users::table
        .filter(users::id.eq_any(ids))
        .load(conn)?;
    Ok(rows
        .iter()
        .map(|user| (user.id, UserSummary::from(user)))
        .collect())
}

/// Fails with a validation error on `field` unless the user exists.
pub(crate) fn ensure_user_exists(
    conn: &mut PgConnection,
    field: &str,
    user_id: Uuid,
) -> AppResult<User> {
    users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| AppError::invalid_field(field, "user does not exist"))
}

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let mut statement = users::table.into_boxed();
    if let Some(role) = query.role {
        statement = statement.filter(users::role.eq(role));
    }
    if let Some(active) = query.active {
        statement = statement.filter(users::active.eq(active));
    }

    let rows: Vec<User> = statement
        .order(users::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    #[validate(email(message = "valid email is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    pub role: Option<Role>,
    #[validate(custom(function = "validate_rate"))]
    pub commission_rate: Option<Decimal>,
}

pub(crate) fn insert_account(
    conn: &mut PgConnection,
    name: &str,
    email: &str,
    raw_password: &str,
    role: Role,
    commission_rate: Decimal,
) -> AppResult<User> {
    let email = normalize_email(email)
        .ok_or_else(|| AppError::invalid_field("email", "valid email is required"))?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        email,
        password_hash: password::hash_password(raw_password)?,
        role,
        commission_rate,
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(conn)
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::conflict("a user with this email already exists"),
            other => AppError::from(other),
        })?;

    info!(user_id = %user.id, role = %user.role, "user account created");
    Ok(user)
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(payload): ValidatedJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let created = insert_account(
        &mut conn,
        &payload.name,
        &payload.email,
        &payload.password,
        payload.role.unwrap_or(Role::User),
        payload.commission_rate.unwrap_or(Decimal::ZERO),
    )?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

fn ensure_self_or_admin(actor: &AuthenticatedUser, user_id: Uuid) -> AppResult<()> {
    if actor.user_id == user_id || actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("not authorized to access this user"))
    }
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    ensure_self_or_admin(&user, user_id)?;
    let mut conn = state.db()?;
    let found: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(found.into()))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset {
    name: Option<String>,
    email: Option<String>,
    role: Option<Role>,
    commission_rate: Option<Decimal>,
    active: Option<bool>,
    updated_at: NaiveDateTime,
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<UserResponse>> {
    ensure_self_or_admin(&user, user_id)?;
    let body = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;
    let patch = writable_patch(user.role, Entity::User, body);

    let name = patch_required::<String>(&patch, "name")?
        .map(|name| {
            not_blank(&name)
                .map(|_| name.trim().to_string())
                .map_err(|_| AppError::invalid_field("name", "must not be empty"))
        })
        .transpose()?;
    let email = patch_required::<String>(&patch, "email")?
        .map(|email| {
            normalize_email(&email)
                .ok_or_else(|| AppError::invalid_field("email", "valid email is required"))
        })
        .transpose()?;
    let commission_rate = patch_required::<Decimal>(&patch, "commissionRate")?;
    if let Some(rate) = &commission_rate {
        validate_rate(rate).map_err(|_| {
            AppError::invalid_field("commissionRate", "rate must be between 0 and 100")
        })?;
    }

    let changes = UserChangeset {
        name,
        email,
        role: patch_required(&patch, "role")?,
        commission_rate,
        active: patch_required(&patch, "active")?,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let updated: User = diesel::update(users::table.find(user_id))
        .set(&changes)
        .get_result(&mut conn)
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::conflict("a user with this email already exists"),
            other => AppError::from(other),
        })?;

    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    conn.transaction::<(), AppError, _>(|conn| {
        users::table
            .find(user_id)
            .select(users::id)
            .for_update()
            .first::<Uuid>(conn)?;

        let owned: i64 = documents::table
            .filter(documents::owner_id.eq(user_id))
            .select(count_star())
            .first(conn)?;
        if owned > 0 {
            return Err(AppError::conflict(format!(
                "user still owns {owned} document(s)"
            )));
        }

        diesel::delete(users::table.find(user_id)).execute(conn)?;
        Ok(())
    })?;

    info!(user_id = %user_id, deleted_by = %user.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Queryable)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub commission_rate: Decimal,
    pub total_commission_earned: Decimal,
}

pub async fn list_referrers(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<ReferrerResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<ReferrerResponse> = users::table
        .filter(users::role.eq_any([Role::Referrer, Role::Admin]))
        .filter(users::active.eq(true))
        .order(users::name.asc())
        .select((
            users::id,
            users::name,
            users::email,
            users::commission_rate,
            users::total_commission_earned,
        ))
        .load(&mut conn)?;
    Ok(Json(rows))
}
