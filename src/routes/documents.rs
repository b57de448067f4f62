use std::collections::{HashMap, HashSet};
use std::time::Duration;

use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::ledger::validate_amount;
use crate::models::{Document, DocumentSigner, NewDocument, NewDocumentSigner, User};
use crate::notify::Notification;
use crate::pipeline::LoanType;
use crate::routes::users::{ensure_user_exists, load_summaries, UserSummary};
use crate::schema::{document_signers, documents, users};
use crate::signing::{
    apply_decision, is_participant, status_after_send, Decision, DocumentStatus, SignerStatus,
};
use crate::state::AppState;
use crate::storage::document_key;
use crate::utils::json::non_empty_trimmed;
use crate::utils::validate::normalize_email;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerResponse {
    pub id: Uuid,
    pub position: i32,
    pub user: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub status: SignerStatus,
    pub signed_at: Option<NaiveDateTime>,
    pub signature_data: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDetailsResponse {
    pub amount: Option<Decimal>,
    #[serde(rename = "type")]
    pub loan_type: Option<LoanType>,
    pub referrer_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_url: String,
    pub file_size: i64,
    pub content_type: String,
    pub checksum: String,
    pub owner: Option<UserSummary>,
    pub status: DocumentStatus,
    pub signers: Vec<SignerResponse>,
    pub loan_details: Option<LoanDetailsResponse>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: DocumentResponse,
    pub file_signed_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub document: DocumentResponse,
    pub notified: usize,
    pub failed: usize,
}

fn to_signer_response(signer: DocumentSigner) -> SignerResponse {
    SignerResponse {
        id: signer.id,
        position: signer.position,
        user: signer.user_id,
        email: signer.email,
        name: signer.name,
        status: signer.status,
        signed_at: signer.signed_at,
        signature_data: signer.signature_data,
    }
}

fn to_document_responses(
    conn: &mut PgConnection,
    docs: Vec<Document>,
) -> AppResult<Vec<DocumentResponse>> {
    let rosters: Vec<Vec<DocumentSigner>> = DocumentSigner::belonging_to(&docs)
        .order(document_signers::position.asc())
        .load::<DocumentSigner>(conn)?
        .grouped_by(&docs);

    let mut owner_ids: Vec<Uuid> = docs.iter().map(|doc| doc.owner_id).collect();
    owner_ids.sort();
    owner_ids.dedup();
    let owners: HashMap<Uuid, UserSummary> = load_summaries(conn, &owner_ids)?;

    Ok(docs
        .into_iter()
        .zip(rosters)
        .map(|(doc, roster)| {
            let loan_details = (doc.loan_amount.is_some()
                || doc.loan_type.is_some()
                || doc.loan_referrer_id.is_some())
            .then(|| LoanDetailsResponse {
                amount: doc.loan_amount,
                loan_type: doc.loan_type,
                referrer_id: doc.loan_referrer_id,
            });
            DocumentResponse {
                owner: owners.get(&doc.owner_id).cloned(),
                signers: roster.into_iter().map(to_signer_response).collect(),
                loan_details,
                id: doc.id,
                title: doc.title,
                description: doc.description,
                file_url: doc.file_url,
                file_size: doc.file_size,
                content_type: doc.content_type,
                checksum: doc.checksum,
                status: doc.status,
                completed_at: doc.completed_at,
                created_at: doc.created_at,
                updated_at: doc.updated_at,
            }
        })
        .collect())
}

fn to_document_response(conn: &mut PgConnection, doc: Document) -> AppResult<DocumentResponse> {
    to_document_responses(conn, vec![doc])?
        .pop()
        .ok_or_else(|| AppError::internal("document response missing"))
}

fn load_roster(conn: &mut PgConnection, doc: &Document) -> AppResult<Vec<DocumentSigner>> {
    Ok(DocumentSigner::belonging_to(doc)
        .order(document_signers::position.asc())
        .load(conn)?)
}

fn load_owned_document(
    conn: &mut PgConnection,
    document_id: Uuid,
    actor: &AuthenticatedUser,
) -> AppResult<Document> {
    let doc: Document = documents::table.find(document_id).first(conn)?;
    if doc.owner_id != actor.user_id {
        return Err(AppError::forbidden("only the document owner can do this"));
    }
    Ok(doc)
}

#[derive(Deserialize)]
pub struct SignerInput {
    pub email: String,
    pub name: Option<String>,
    pub user: Option<Uuid>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoanDetailsInput {
    #[validate(custom(function = "validate_amount"))]
    pub amount: Option<Decimal>,
    #[serde(rename = "type")]
    pub loan_type: Option<LoanType>,
    pub referrer_id: Option<Uuid>,
}

struct UploadedFile {
    bytes: Vec<u8>,
    file_name: String,
    content_type: Option<String>,
}

/// `application/pdf` or `image/*`, falling back to the file extension when the
/// part carries no usable type.
fn resolve_content_type(declared: Option<&str>, file_name: &str) -> Option<String> {
    let declared = declared
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "application/octet-stream");
    let content_type = declared.unwrap_or_else(|| {
        mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    let allowed = content_type == "application/pdf" || content_type.starts_with("image/");
    allowed.then_some(content_type)
}

fn parse_signers(raw: &str) -> AppResult<Vec<(Option<Uuid>, String, String)>> {
    let inputs: Vec<SignerInput> = serde_json::from_str(raw)
        .map_err(|err| AppError::invalid_field("signers", format!("must be a JSON array: {err}")))?;
    let mut seen = HashSet::new();
    inputs
        .into_iter()
        .map(|input| {
            let email = normalize_email(&input.email).ok_or_else(|| {
                AppError::invalid_field("signers", format!("invalid signer email '{}'", input.email))
            })?;
            if !seen.insert(email.clone()) {
                return Err(AppError::invalid_field(
                    "signers",
                    format!("duplicate signer email '{email}'"),
                ));
            }
            let name = non_empty_trimmed(input.name)
                .ok_or_else(|| AppError::invalid_field("signers", "every signer needs a name"))?;
            Ok((input.user, email, name))
        })
        .collect()
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> AppResult<String> {
    field.text().await.map_err(|err| {
        error!(error = %err, field = name, "failed to read multipart field");
        AppError::bad_request(format!("invalid {name} field: {err}"))
    })
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let mut file: Option<UploadedFile> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut signers_raw: Option<String> = None;
    let mut loan_raw: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::invalid_field("file", format!("failed to read file: {err}"))
                })?;
                file = Some(UploadedFile {
                    bytes: data.to_vec(),
                    file_name,
                    content_type,
                });
            }
            Some("title") => title = Some(read_text(field, "title").await?),
            Some("description") => description = Some(read_text(field, "description").await?),
            Some("signers") => signers_raw = Some(read_text(field, "signers").await?),
            Some("loanDetails") => loan_raw = Some(read_text(field, "loanDetails").await?),
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::invalid_field("file", "please upload a file"))?;
    if file.bytes.is_empty() {
        return Err(AppError::invalid_field("file", "file must not be empty"));
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::invalid_field("file", "file exceeds the 10 MiB limit"));
    }
    let content_type = resolve_content_type(file.content_type.as_deref(), &file.file_name)
        .ok_or_else(|| AppError::invalid_field("file", "only PDF and image files are allowed"))?;

    let signers = match signers_raw.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_signers(raw)?,
        _ => Vec::new(),
    };
    let loan: Option<LoanDetailsInput> = match loan_raw.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let parsed: LoanDetailsInput = serde_json::from_str(raw).map_err(|err| {
                AppError::invalid_field("loanDetails", format!("must be a JSON object: {err}"))
            })?;
            parsed.validate()?;
            Some(parsed)
        }
        _ => None,
    };

    {
        let mut conn = state.db()?;
        for (user_ref, _, _) in &signers {
            if let Some(user_ref) = user_ref {
                ensure_user_exists(&mut conn, "signers", *user_ref)?;
            }
        }
        if let Some(referrer) = loan.as_ref().and_then(|loan| loan.referrer_id) {
            ensure_user_exists(&mut conn, "loanDetails", referrer)?;
        }
    }

    let document_id = Uuid::new_v4();
    let file_key = document_key(document_id, &file.file_name);
    let checksum = hex::encode(Sha256::digest(&file.bytes));
    let file_size = file.bytes.len() as i64;
    let title = non_empty_trimmed(title).unwrap_or_else(|| file.file_name.clone());

    let file_url = state
        .storage
        .put_object(&file_key, file.bytes, &content_type)
        .await
        .map_err(|err| {
            error!(error = ?err, key = %file_key, "document upload to storage failed");
            AppError::upstream("file upload failed")
        })?;

    let new_document = NewDocument {
        id: document_id,
        title,
        description: non_empty_trimmed(description),
        file_url,
        file_key: file_key.clone(),
        file_size,
        content_type,
        checksum,
        owner_id: user.user_id,
        status: DocumentStatus::Draft,
        loan_amount: loan.as_ref().and_then(|loan| loan.amount),
        loan_type: loan.as_ref().and_then(|loan| loan.loan_type),
        loan_referrer_id: loan.as_ref().and_then(|loan| loan.referrer_id),
    };
    let new_signers: Vec<NewDocumentSigner> = signers
        .into_iter()
        .enumerate()
        .map(|(position, (user_id, email, name))| NewDocumentSigner {
            id: Uuid::new_v4(),
            document_id,
            position: position as i32,
            user_id,
            email,
            name,
            status: SignerStatus::Pending,
        })
        .collect();

    let inserted = state.db().and_then(|mut conn| {
        let doc = conn.transaction::<Document, AppError, _>(|conn| {
            let doc: Document = diesel::insert_into(documents::table)
                .values(&new_document)
                .get_result(conn)?;
            diesel::insert_into(document_signers::table)
                .values(&new_signers)
                .execute(conn)?;
            Ok(doc)
        })?;
        to_document_response(&mut conn, doc)
    });

    match inserted {
        Ok(response) => {
            info!(
                document_id = %document_id,
                owner_id = %user.user_id,
                signers = response.signers.len(),
                size = file_size,
                "document created"
            );
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&file_key).await {
                warn!(error = ?cleanup, key = %file_key, "failed to remove orphaned upload");
            }
            Err(err)
        }
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    let signed_by_actor = document_signers::table
        .filter(
            document_signers::user_id
                .eq(user.user_id)
                .or(document_signers::email.eq(user.email.to_lowercase())),
        )
        .select(document_signers::document_id);

    let docs: Vec<Document> = documents::table
        .filter(
            documents::owner_id
                .eq(user.user_id)
                .or(documents::id.eq_any(signed_by_actor)),
        )
        .order((documents::created_at.desc(), documents::id.desc()))
        .load(&mut conn)?;

    Ok(Json(to_document_responses(&mut conn, docs)?))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    let roster = load_roster(&mut conn, &doc)?;
    if doc.owner_id != user.user_id && !is_participant(&roster, user.user_id, &user.email) {
        return Err(AppError::forbidden("not authorized to access this document"));
    }
    let file_key = doc.file_key.clone();
    let document = to_document_response(&mut conn, doc)?;
    drop(conn);

    let file_signed_url = state
        .storage
        .presign_get_object(&file_key, PRESIGNED_URL_TTL)
        .await
        .map_err(|err| {
            error!(error = ?err, key = %file_key, "failed to presign document url");
            AppError::upstream("failed to generate document url")
        })?;

    Ok(Json(DocumentDetailResponse {
        document,
        file_signed_url,
    }))
}

pub async fn send_for_signature(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<SendResponse>> {
    let (doc, batch) = {
        let mut conn = state.db()?;
        let doc = load_owned_document(&mut conn, document_id, &user)?;
        let roster = load_roster(&mut conn, &doc)?;
        let statuses: Vec<SignerStatus> = roster.iter().map(|s| s.status).collect();
        status_after_send(doc.status, &statuses).map_err(|status| {
            AppError::conflict(format!("document is {status} and cannot be sent"))
        })?;

        let sender: User = users::table.find(doc.owner_id).first(&mut conn)?;
        let sign_url = state.config.signing_url(doc.id);
        let batch: Vec<(String, Notification)> = roster
            .into_iter()
            .filter(|signer| signer.status == SignerStatus::Pending)
            .map(|signer| {
                (
                    signer.email,
                    Notification::SignatureRequest {
                        document_title: doc.title.clone(),
                        sign_url: sign_url.clone(),
                        sender_name: sender.name.clone(),
                    },
                )
            })
            .collect();
        (doc, batch)
    };

    let attempted = batch.len();
    let failed = state.notifications.deliver_all(batch).await;

    let mut conn = state.db()?;
    let updated = conn.transaction::<Document, AppError, _>(|conn| {
        let locked: Document = documents::table
            .find(doc.id)
            .for_update()
            .first(conn)?;
        let roster = load_roster(conn, &locked)?;
        let statuses: Vec<SignerStatus> = roster.iter().map(|s| s.status).collect();
        let next = status_after_send(locked.status, &statuses).map_err(|status| {
            AppError::conflict(format!("document became {status} while sending"))
        })?;
        Ok(diesel::update(documents::table.find(locked.id))
            .set((
                documents::status.eq(next),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?)
    })?;

    info!(
        document_id = %updated.id,
        status = %updated.status,
        notified = attempted - failed,
        failed,
        "signature requests sent"
    );

    Ok(Json(SendResponse {
        document: to_document_response(&mut conn, updated)?,
        notified: attempted - failed,
        failed,
    }))
}

fn record_decision(
    state: &AppState,
    document_id: Uuid,
    actor: &AuthenticatedUser,
    decision: Decision,
) -> AppResult<DocumentResponse> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let doc = conn.transaction::<Document, AppError, _>(|conn| {
        let locked: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        let mut roster = load_roster(conn, &locked)?;
        let transition = apply_decision(
            locked.status,
            &mut roster,
            actor.user_id,
            &actor.email,
            decision,
            now,
        )?;

        let slot = &roster[transition.signer_index];
        diesel::update(document_signers::table.find(slot.id))
            .set((
                document_signers::status.eq(slot.status),
                document_signers::signed_at.eq(slot.signed_at),
                document_signers::signature_data.eq(slot.signature_data.clone()),
                document_signers::user_id.eq(slot.user_id.or(Some(actor.user_id))),
            ))
            .execute(conn)?;

        Ok(diesel::update(documents::table.find(locked.id))
            .set((
                documents::status.eq(transition.status),
                documents::completed_at.eq(transition.completed_at),
                documents::updated_at.eq(now),
            ))
            .get_result(conn)?)
    })?;

    info!(
        document_id = %doc.id,
        signer_id = %actor.user_id,
        status = %doc.status,
        "signer decision recorded"
    );
    to_document_response(&mut conn, doc)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    #[validate(length(min = 1, message = "signature data is required"))]
    pub signature_data: String,
}

pub async fn sign_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    ValidatedJson(payload): ValidatedJson<SignRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let decision = Decision::Sign {
        signature_data: payload.signature_data,
    };
    Ok(Json(record_decision(&state, document_id, &user, decision)?))
}

#[derive(Deserialize, Default)]
pub struct DeclineRequest {
    pub reason: Option<String>,
}

pub async fn decline_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    payload: Option<Json<DeclineRequest>>,
) -> AppResult<Json<DocumentResponse>> {
    let Json(payload) = payload.unwrap_or_default();
    if let Some(reason) = non_empty_trimmed(payload.reason) {
        info!(document_id = %document_id, signer_id = %user.user_id, reason = %reason, "signer declined");
    }
    Ok(Json(record_decision(
        &state,
        document_id,
        &user,
        Decision::Decline,
    )?))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let doc = {
        let mut conn = state.db()?;
        load_owned_document(&mut conn, document_id, &user)?
    };

    state
        .storage
        .delete_object(&doc.file_key)
        .await
        .map_err(|err| {
            error!(error = ?err, key = %doc.file_key, "failed to delete document file");
            AppError::upstream("file deletion failed; document kept")
        })?;

    let mut conn = state.db()?;
    diesel::delete(documents::table.find(doc.id)).execute(&mut conn)?;
    info!(document_id = %doc.id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}
