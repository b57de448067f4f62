use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::access::{can_write, writable_patch, Entity};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::ledger::validate_amount;
use crate::models::{Document, Lead, LeadNote, NewLead, NewLeadDocument, NewLeadNote};
use crate::pipeline::{can_manage_lead, lead_scope, LeadScope, LeadSource, LeadStatus, LoanType};
use crate::routes::users::{ensure_user_exists, load_summaries, UserSummary};
use crate::schema::{documents, lead_documents, lead_notes, leads};
use crate::signing::DocumentStatus;
use crate::state::AppState;
use crate::utils::json::{patch_nullable, patch_required, NullableValue};
use crate::utils::validate::{normalize_email, not_blank};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub loan_amount: Decimal,
    pub loan_type: LoanType,
    pub status: LeadStatus,
    pub referrer: Option<UserSummary>,
    pub assigned_to: Option<UserSummary>,
    pub expected_close_date: Option<NaiveDate>,
    pub source: LeadSource,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteResponse {
    pub id: Uuid,
    pub content: String,
    pub created_by: Option<UserSummary>,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDocument {
    pub id: Uuid,
    pub title: String,
    pub status: DocumentStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct LeadDetailResponse {
    #[serde(flatten)]
    pub lead: LeadResponse,
    pub notes: Vec<NoteResponse>,
    pub documents: Vec<AttachedDocument>,
}

fn to_lead_responses(conn: &mut PgConnection, rows: Vec<Lead>) -> AppResult<Vec<LeadResponse>> {
    let mut ids: Vec<Uuid> = rows
        .iter()
        .flat_map(|lead| [lead.referrer_id, lead.assigned_to])
        .flatten()
        .collect();
    ids.sort();
    ids.dedup();
    let people = load_summaries(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|lead| LeadResponse {
            referrer: lead.referrer_id.and_then(|id| people.get(&id).cloned()),
            assigned_to: lead.assigned_to.and_then(|id| people.get(&id).cloned()),
            id: lead.id,
            name: lead.name,
            email: lead.email,
            phone: lead.phone,
            company: lead.company,
            loan_amount: lead.loan_amount,
            loan_type: lead.loan_type,
            status: lead.status,
            expected_close_date: lead.expected_close_date,
            source: lead.source,
            created_at: lead.created_at,
            updated_at: lead.updated_at,
        })
        .collect())
}

fn load_lead_detail(conn: &mut PgConnection, lead: Lead) -> AppResult<LeadDetailResponse> {
    let notes: Vec<LeadNote> = LeadNote::belonging_to(&lead)
        .order(lead_notes::created_at.asc())
        .load(conn)?;

    let attached: Vec<Document> = lead_documents::table
        .inner_join(documents::table)
        .filter(lead_documents::lead_id.eq(lead.id))
        .order(lead_documents::attached_at.asc())
        .select(documents::all_columns)
        .load(conn)?;

    let author_ids: Vec<Uuid> = notes.iter().filter_map(|note| note.author_id).collect();
    let authors: HashMap<Uuid, UserSummary> = load_summaries(conn, &author_ids)?;

    let lead = to_lead_responses(conn, vec![lead])?
        .pop()
        .ok_or_else(|| AppError::internal("lead response missing"))?;

    Ok(LeadDetailResponse {
        lead,
        notes: notes
            .into_iter()
            .map(|note| NoteResponse {
                id: note.id,
                content: note.content,
                created_by: note.author_id.and_then(|id| authors.get(&id).cloned()),
                created_at: note.created_at,
            })
            .collect(),
        documents: attached
            .into_iter()
            .map(|doc| AttachedDocument {
                id: doc.id,
                title: doc.title,
                status: doc.status,
                created_at: doc.created_at,
            })
            .collect(),
    })
}

fn load_managed_lead(
    conn: &mut PgConnection,
    lead_id: Uuid,
    actor: &AuthenticatedUser,
) -> AppResult<Lead> {
    let lead: Lead = leads::table.find(lead_id).first(conn)?;
    if !can_manage_lead(actor, lead.referrer_id, lead.assigned_to) {
        return Err(AppError::forbidden("not authorized to access this lead"));
    }
    Ok(lead)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    #[validate(email(message = "valid email is required"))]
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[validate(custom(function = "validate_amount"))]
    pub loan_amount: Decimal,
    pub loan_type: LoanType,
    pub status: Option<LeadStatus>,
    pub referrer: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub expected_close_date: Option<NaiveDate>,
    pub source: Option<LeadSource>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    crate::utils::json::non_empty_trimmed(value)
}

pub async fn create_lead(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(payload): ValidatedJson<CreateLeadRequest>,
) -> AppResult<(StatusCode, Json<LeadDetailResponse>)> {
    let mut conn = state.db()?;

    let referrer_id = match payload.referrer {
        Some(referrer) if can_write(user.role, Entity::NewLead, "referrer") => {
            ensure_user_exists(&mut conn, "referrer", referrer)?;
            referrer
        }
        _ => user.user_id,
    };
    if let Some(assignee) = payload.assigned_to {
        ensure_user_exists(&mut conn, "assignedTo", assignee)?;
    }

    let new_lead = NewLead {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        email: normalize_email(&payload.email)
            .ok_or_else(|| AppError::invalid_field("email", "valid email is required"))?,
        phone: trimmed(payload.phone),
        company: trimmed(payload.company),
        loan_amount: payload.loan_amount,
        loan_type: payload.loan_type,
        status: payload.status.unwrap_or(LeadStatus::New),
        referrer_id: Some(referrer_id),
        assigned_to: payload.assigned_to,
        expected_close_date: payload.expected_close_date,
        source: payload.source.unwrap_or(LeadSource::Referral),
    };

    let lead: Lead = diesel::insert_into(leads::table)
        .values(&new_lead)
        .get_result(&mut conn)?;

    info!(lead_id = %lead.id, referrer_id = %referrer_id, "lead created");
    let detail = load_lead_detail(&mut conn, lead)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLeadsQuery {
    pub status: Option<LeadStatus>,
    pub loan_type: Option<LoanType>,
    pub source: Option<LeadSource>,
}

pub async fn list_leads(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListLeadsQuery>,
) -> AppResult<Json<Vec<LeadResponse>>> {
    let mut conn = state.db()?;

    let mut statement = leads::table.into_boxed();
    match lead_scope(&user) {
        LeadScope::All => {}
        LeadScope::ReferredBy(id) => {
            statement = statement.filter(leads::referrer_id.eq(id));
        }
        LeadScope::ReferredByOrAssignedTo(id) => {
            statement = statement
                .filter(leads::referrer_id.eq(id).or(leads::assigned_to.eq(id)));
        }
    }
    if let Some(status) = query.status {
        statement = statement.filter(leads::status.eq(status));
    }
    if let Some(loan_type) = query.loan_type {
        statement = statement.filter(leads::loan_type.eq(loan_type));
    }
    if let Some(source) = query.source {
        statement = statement.filter(leads::source.eq(source));
    }

    let rows: Vec<Lead> = statement
        .order((leads::created_at.desc(), leads::id.desc()))
        .load(&mut conn)?;
    Ok(Json(to_lead_responses(&mut conn, rows)?))
}

pub async fn get_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<LeadDetailResponse>> {
    let mut conn = state.db()?;
    let lead = load_managed_lead(&mut conn, lead_id, &user)?;
    Ok(Json(load_lead_detail(&mut conn, lead)?))
}

#[derive(AsChangeset)]
#[diesel(table_name = leads)]
struct LeadChangeset {
    name: Option<String>,
    email: Option<String>,
    phone: Option<Option<String>>,
    company: Option<Option<String>>,
    loan_amount: Option<Decimal>,
    loan_type: Option<LoanType>,
    status: Option<LeadStatus>,
    assigned_to: Option<Option<Uuid>>,
    expected_close_date: Option<Option<NaiveDate>>,
    source: Option<LeadSource>,
    updated_at: NaiveDateTime,
}

fn nullable_text(value: NullableValue<String>) -> Option<Option<String>> {
    match value {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::Value(text) => Some(trimmed(Some(text))),
    }
}

fn nullable_column<T>(value: NullableValue<T>) -> Option<Option<T>> {
    match value {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::Value(inner) => Some(Some(inner)),
    }
}

pub async fn update_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<LeadDetailResponse>> {
    let body = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;
    let mut conn = state.db()?;
    load_managed_lead(&mut conn, lead_id, &user)?;

    let patch = writable_patch(user.role, Entity::Lead, body);

    let name = patch_required::<String>(&patch, "name")?
        .map(|name| match not_blank(&name) {
            Ok(()) => Ok(name.trim().to_string()),
            Err(_) => Err(AppError::invalid_field("name", "lead name is required")),
        })
        .transpose()?;
    let email = patch_required::<String>(&patch, "email")?
        .map(|email| {
            normalize_email(&email)
                .ok_or_else(|| AppError::invalid_field("email", "valid email is required"))
        })
        .transpose()?;
    let loan_amount = patch_required::<Decimal>(&patch, "loanAmount")?;
    if let Some(amount) = &loan_amount {
        validate_amount(amount)
            .map_err(|_| AppError::invalid_field("loanAmount", "amount must not be negative"))?;
    }
    let assigned_to = patch_nullable::<Uuid>(&patch, "assignedTo")?;
    if let NullableValue::Value(assignee) = &assigned_to {
        ensure_user_exists(&mut conn, "assignedTo", *assignee)?;
    }

    let changes = LeadChangeset {
        name,
        email,
        phone: nullable_text(patch_nullable(&patch, "phone")?),
        company: nullable_text(patch_nullable(&patch, "company")?),
        loan_amount,
        loan_type: patch_required(&patch, "loanType")?,
        status: patch_required(&patch, "status")?,
        assigned_to: nullable_column(assigned_to),
        expected_close_date: nullable_column(patch_nullable(&patch, "expectedCloseDate")?),
        source: patch_required(&patch, "source")?,
        updated_at: Utc::now().naive_utc(),
    };

    let lead: Lead = diesel::update(leads::table.find(lead_id))
        .set(&changes)
        .get_result(&mut conn)?;

    Ok(Json(load_lead_detail(&mut conn, lead)?))
}

#[derive(Deserialize, Validate)]
pub struct AddNoteRequest {
    #[validate(custom(function = "not_blank"))]
    pub content: String,
}

pub async fn add_note(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    user: AuthenticatedUser,
    ValidatedJson(payload): ValidatedJson<AddNoteRequest>,
) -> AppResult<(StatusCode, Json<LeadDetailResponse>)> {
    let mut conn = state.db()?;
    let lead = load_managed_lead(&mut conn, lead_id, &user)?;

    let note = NewLeadNote {
        id: Uuid::new_v4(),
        lead_id,
        content: payload.content.trim().to_string(),
        author_id: Some(user.user_id),
    };
    diesel::insert_into(lead_notes::table)
        .values(&note)
        .execute(&mut conn)?;

    Ok((StatusCode::CREATED, Json(load_lead_detail(&mut conn, lead)?)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachDocumentRequest {
    pub document_id: Uuid,
}

pub async fn attach_document(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AttachDocumentRequest>,
) -> AppResult<Json<LeadDetailResponse>> {
    let mut conn = state.db()?;
    let lead = load_managed_lead(&mut conn, lead_id, &user)?;

    let document: Document = documents::table
        .find(payload.document_id)
        .first::<Document>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::invalid_field("documentId", "document does not exist"))?;
    if document.owner_id != user.user_id && !user.is_admin() {
        return Err(AppError::forbidden(
            "only the document owner can attach it to a lead",
        ));
    }

    let inserted = diesel::insert_into(lead_documents::table)
        .values(&NewLeadDocument {
            lead_id,
            document_id: document.id,
            attached_by: Some(user.user_id),
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)?;
    if inserted > 0 {
        info!(lead_id = %lead_id, document_id = %document.id, "document attached to lead");
    }

    Ok(Json(load_lead_detail(&mut conn, lead)?))
}

pub async fn delete_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let deleted = diesel::delete(leads::table.find(lead_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(lead_id = %lead_id, deleted_by = %user.user_id, "lead deleted");
    Ok(StatusCode::NO_CONTENT)
}
