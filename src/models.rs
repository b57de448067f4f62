use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::access::Role;
use crate::ledger::CommissionStatus;
use crate::pipeline::{LeadSource, LeadStatus, LoanType};
use crate::schema::*;
use crate::signing::{DocumentStatus, SignerStatus};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub commission_rate: Decimal,
    pub total_commission_earned: Decimal,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub commission_rate: Decimal,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_url: String,
    pub file_key: String,
    pub file_size: i64,
    pub content_type: String,
    pub checksum: String,
    pub owner_id: Uuid,
    pub status: DocumentStatus,
    pub loan_amount: Option<Decimal>,
    pub loan_type: Option<LoanType>,
    pub loan_referrer_id: Option<Uuid>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_url: String,
    pub file_key: String,
    pub file_size: i64,
    pub content_type: String,
    pub checksum: String,
    pub owner_id: Uuid,
    pub status: DocumentStatus,
    pub loan_amount: Option<Decimal>,
    pub loan_type: Option<LoanType>,
    pub loan_referrer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_signers)]
#[diesel(belongs_to(Document))]
pub struct DocumentSigner {
    pub id: Uuid,
    pub document_id: Uuid,
    pub position: i32,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub status: SignerStatus,
    pub signed_at: Option<NaiveDateTime>,
    pub signature_data: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_signers)]
pub struct NewDocumentSigner {
    pub id: Uuid,
    pub document_id: Uuid,
    pub position: i32,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub status: SignerStatus,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub loan_amount: Decimal,
    pub loan_type: LoanType,
    pub status: LeadStatus,
    pub referrer_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub expected_close_date: Option<NaiveDate>,
    pub source: LeadSource,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = leads)]
pub struct NewLead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub loan_amount: Decimal,
    pub loan_type: LoanType,
    pub status: LeadStatus,
    pub referrer_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub expected_close_date: Option<NaiveDate>,
    pub source: LeadSource,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = lead_notes)]
#[diesel(belongs_to(Lead))]
pub struct LeadNote {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = lead_notes)]
pub struct NewLeadNote {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = lead_documents)]
pub struct NewLeadDocument {
    pub lead_id: Uuid,
    pub document_id: Uuid,
    pub attached_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = commissions)]
pub struct Commission {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub lead_id: Uuid,
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

#[derive(Debug, Insertable)]
#[diesel(table_name = commissions)]
pub struct NewCommission {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub lead_id: Uuid,
    pub document_id: Option<Uuid>,
    pub loan_amount: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    pub status: CommissionStatus,
    pub paid_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}
