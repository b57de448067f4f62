use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::access::{writable_patch, Entity};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::ledger::{
    check_status_change, check_terms_change, commission_amount, running_total_delta,
    validate_amount, validate_rate, CommissionStatus, CommissionTotals,
};
use crate::models::{Commission, Lead, NewCommission, User};
use crate::notify::Notification;
use crate::routes::users::{ensure_user_exists, load_summaries, UserSummary};
use crate::schema::{commissions, documents, leads, users};
use crate::state::AppState;
use crate::utils::json::{non_empty_trimmed, patch_nullable, patch_required, NullableValue};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub loan_amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionResponse {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referrer: Option<UserSummary>,
    pub lead_id: Uuid,
    pub lead: Option<LeadSummary>,
    pub document_id: Option<Uuid>,
    pub loan_amount: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    pub status: CommissionStatus,
    pub paid_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct CommissionListResponse {
    pub count: usize,
    pub totals: CommissionTotals,
    pub commissions: Vec<CommissionResponse>,
}

fn to_commission_responses(
    conn: &mut PgConnection,
    rows: Vec<Commission>,
) -> AppResult<Vec<CommissionResponse>> {
    let mut referrer_ids: Vec<Uuid> = rows.iter().map(|c| c.referrer_id).collect();
    referrer_ids.sort();
    referrer_ids.dedup();
    let referrers = load_summaries(conn, &referrer_ids)?;

    let lead_ids: Vec<Uuid> = rows.iter().map(|c| c.lead_id).collect();
    let lead_rows: Vec<Lead> = if lead_ids.is_empty() {
        Vec::new()
    } else {
        leads::table.filter(leads::id.eq_any(&lead_ids)).load(conn)?
    };
    let leads_by_id: HashMap<Uuid, LeadSummary> = lead_rows
        .into_iter()
        .map(|lead| {
            (
                lead.id,
                LeadSummary {
                    id: lead.id,
                    name: lead.name,
                    email: lead.email,
                    company: lead.company,
                    loan_amount: lead.loan_amount,
                },
            )
        })
        .collect();

    Ok(rows
        .into_iter()
        .map(|c| CommissionResponse {
            referrer: referrers.get(&c.referrer_id).cloned(),
            lead: leads_by_id.get(&c.lead_id).cloned(),
            id: c.id,
            referrer_id: c.referrer_id,
            lead_id: c.lead_id,
            document_id: c.document_id,
            loan_amount: c.loan_amount,
            rate: c.rate,
            amount: c.amount,
            status: c.status,
            paid_at: c.paid_at,
            notes: c.notes,
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
        .collect())
}

fn to_commission_response(
    conn: &mut PgConnection,
    commission: Commission,
) -> AppResult<CommissionResponse> {
    to_commission_responses(conn, vec![commission])?
        .pop()
        .ok_or_else(|| AppError::internal("commission response missing"))
}

/// Adds `delta` to the referrer's running total. Returns `false` when the
/// referrer no longer exists.
fn adjust_running_total(
    conn: &mut PgConnection,
    referrer_id: Uuid,
    delta: Decimal,
) -> AppResult<bool> {
    if delta.is_zero() {
        return Ok(true);
    }
    let updated = diesel::update(users::table.find(referrer_id))
        .set((
            users::total_commission_earned.eq(users::total_commission_earned + delta),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(updated > 0)
}

/// Hands the commission-paid email to the dispatcher without waiting for it.
fn notify_paid(state: &AppState, conn: &mut PgConnection, commission: &Commission) {
    let referrer: Option<User> = match users::table
        .find(commission.referrer_id)
        .first(conn)
        .optional()
    {
        Ok(referrer) => referrer,
        Err(err) => {
            warn!(error = %err, commission_id = %commission.id, "failed to load referrer for notification");
            return;
        }
    };
    let Some(referrer) = referrer else {
        warn!(commission_id = %commission.id, "referrer missing; commission notification skipped");
        return;
    };
    let lead_name = leads::table
        .find(commission.lead_id)
        .select(leads::name)
        .first::<String>(conn)
        .optional()
        .ok()
        .flatten()
        .unwrap_or_else(|| "your referral".to_string());

    state.notifications.spawn(
        referrer.email,
        Notification::CommissionPaid {
            amount: commission.amount,
            lead_name,
        },
    );
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommissionRequest {
    pub referrer: Uuid,
    pub lead: Uuid,
    pub document: Option<Uuid>,
    #[validate(custom(function = "validate_amount"))]
    pub loan_amount: Decimal,
    #[validate(custom(function = "validate_rate"))]
    pub rate: Decimal,
    pub status: Option<CommissionStatus>,
    pub notes: Option<String>,
}

pub async fn create_commission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(payload): ValidatedJson<CreateCommissionRequest>,
) -> AppResult<(StatusCode, Json<CommissionResponse>)> {
    user.require_admin()?;
    let mut conn = state.db()?;

    ensure_user_exists(&mut conn, "referrer", payload.referrer)?;
    let lead_exists: Option<Uuid> = leads::table
        .find(payload.lead)
        .select(leads::id)
        .first(&mut conn)
        .optional()?;
    if lead_exists.is_none() {
        return Err(AppError::invalid_field("lead", "lead does not exist"));
    }
    if let Some(document_id) = payload.document {
        let document_exists: Option<Uuid> = documents::table
            .find(document_id)
            .select(documents::id)
            .first(&mut conn)
            .optional()?;
        if document_exists.is_none() {
            return Err(AppError::invalid_field("document", "document does not exist"));
        }
    }

    let status = payload.status.unwrap_or(CommissionStatus::Pending);
    let amount = commission_amount(payload.loan_amount, payload.rate)?;
    let new_commission = NewCommission {
        id: Uuid::new_v4(),
        referrer_id: payload.referrer,
        lead_id: payload.lead,
        document_id: payload.document,
        loan_amount: payload.loan_amount,
        rate: payload.rate,
        amount,
        status,
        paid_at: (status == CommissionStatus::Paid).then(|| Utc::now().naive_utc()),
        notes: non_empty_trimmed(payload.notes),
    };

    let commission = conn.transaction::<Commission, AppError, _>(|conn| {
        let commission: Commission = diesel::insert_into(commissions::table)
            .values(&new_commission)
            .get_result(conn)?;
        let delta = running_total_delta(None, Some(commission.status), commission.amount);
        adjust_running_total(conn, commission.referrer_id, delta)?;
        Ok(commission)
    })?;

    info!(
        commission_id = %commission.id,
        referrer_id = %commission.referrer_id,
        amount = %commission.amount,
        status = %commission.status,
        "commission created"
    );

    let response = to_commission_response(&mut conn, commission)?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
pub struct ListCommissionsQuery {
    pub status: Option<CommissionStatus>,
}

pub async fn list_commissions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListCommissionsQuery>,
) -> AppResult<Json<CommissionListResponse>> {
    let mut conn = state.db()?;

    let mut statement = commissions::table.into_boxed();
    if !user.is_admin() {
        statement = statement.filter(commissions::referrer_id.eq(user.user_id));
    }
    if let Some(status) = query.status {
        statement = statement.filter(commissions::status.eq(status));
    }

    let rows: Vec<Commission> = statement
        .order((commissions::created_at.desc(), commissions::id.desc()))
        .load(&mut conn)?;

    let totals: CommissionTotals = rows.iter().map(|c| (c.status, c.amount)).collect();
    let commissions = to_commission_responses(&mut conn, rows)?;

    Ok(Json(CommissionListResponse {
        count: commissions.len(),
        totals,
        commissions,
    }))
}

pub async fn get_commission(
    State(state): State<AppState>,
    Path(commission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<CommissionResponse>> {
    let mut conn = state.db()?;
    let commission: Commission = commissions::table.find(commission_id).first(&mut conn)?;
    if !user.is_admin() && commission.referrer_id != user.user_id {
        return Err(AppError::forbidden("not authorized to access this commission"));
    }
    Ok(Json(to_commission_response(&mut conn, commission)?))
}

#[derive(AsChangeset)]
#[diesel(table_name = commissions)]
struct CommissionChangeset {
    loan_amount: Decimal,
    rate: Decimal,
    amount: Decimal,
    status: CommissionStatus,
    paid_at: Option<NaiveDateTime>,
    notes: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

pub async fn update_commission(
    State(state): State<AppState>,
    Path(commission_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<CommissionResponse>> {
    user.require_admin()?;
    let body = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;
    let patch = writable_patch(user.role, Entity::Commission, body);

    let new_status = patch_required::<CommissionStatus>(&patch, "status")?;
    let new_loan_amount = patch_required::<Decimal>(&patch, "loanAmount")?;
    let new_rate = patch_required::<Decimal>(&patch, "rate")?;
    let notes = match patch_nullable::<String>(&patch, "notes")? {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::Value(text) => Some(non_empty_trimmed(Some(text))),
    };
    if let Some(amount) = &new_loan_amount {
        validate_amount(amount).map_err(|err| {
            let message = err.message.map(|m| m.to_string()).unwrap_or_default();
            AppError::invalid_field("loanAmount", message)
        })?;
    }
    if let Some(rate) = &new_rate {
        validate_rate(rate)
            .map_err(|_| AppError::invalid_field("rate", "rate must be between 0 and 100"))?;
    }

    let mut conn = state.db()?;
    let (before, after) = conn.transaction::<(Commission, Commission), AppError, _>(|conn| {
        let current: Commission = commissions::table
            .find(commission_id)
            .for_update()
            .first(conn)?;

        let status = new_status.unwrap_or(current.status);
        check_status_change(current.status, status)?;
        if new_loan_amount.is_some() || new_rate.is_some() {
            check_terms_change(current.status)?;
        }

        let loan_amount = new_loan_amount.unwrap_or(current.loan_amount);
        let rate = new_rate.unwrap_or(current.rate);
        let amount = commission_amount(loan_amount, rate)?;
        let now = Utc::now().naive_utc();
        let paid_at = if status == CommissionStatus::Paid && current.status != CommissionStatus::Paid
        {
            Some(now)
        } else {
            current.paid_at
        };

        let updated: Commission = diesel::update(commissions::table.find(current.id))
            .set(&CommissionChangeset {
                loan_amount,
                rate,
                amount,
                status,
                paid_at,
                notes: notes.clone(),
                updated_at: now,
            })
            .get_result(conn)?;

        let delta = running_total_delta(Some(current.status), Some(updated.status), updated.amount);
        if !adjust_running_total(conn, updated.referrer_id, delta)? {
            warn!(
                commission_id = %updated.id,
                referrer_id = %updated.referrer_id,
                "referrer missing; running total not adjusted"
            );
        }
        Ok((current, updated))
    })?;

    info!(
        commission_id = %after.id,
        from = %before.status,
        to = %after.status,
        amount = %after.amount,
        "commission updated"
    );

    if before.status != CommissionStatus::Paid && after.status == CommissionStatus::Paid {
        notify_paid(&state, &mut conn, &after);
    }

    Ok(Json(to_commission_response(&mut conn, after)?))
}

pub async fn delete_commission(
    State(state): State<AppState>,
    Path(commission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    conn.transaction::<(), AppError, _>(|conn| {
        let current: Commission = commissions::table
            .find(commission_id)
            .for_update()
            .first(conn)?;

        let delta = running_total_delta(Some(current.status), None, current.amount);
        if !adjust_running_total(conn, current.referrer_id, delta)? {
            warn!(
                commission_id = %current.id,
                referrer_id = %current.referrer_id,
                "referrer missing; paid commission removed without adjusting a total"
            );
        }

        diesel::delete(commissions::table.find(current.id)).execute(conn)?;
        Ok(())
    })?;

    info!(commission_id = %commission_id, deleted_by = %user.user_id, "commission deleted");
    Ok(StatusCode::NO_CONTENT)
}
