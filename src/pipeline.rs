//! Lead pipeline enums and role-scoped visibility.

use uuid::Uuid;

use crate::access::Role;
use crate::auth::AuthenticatedUser;
use crate::utils::text_enum::text_enum;

text_enum! {
    pub enum LeadStatus {
        New => "new",
        Contacted => "contacted",
        Qualified => "qualified",
        ProposalSent => "proposal_sent",
        Negotiating => "negotiating",
        Won => "won",
        Lost => "lost",
    }
}

text_enum! {
    pub enum LoanType {
        Business => "business",
        Equipment => "equipment",
        RealEstate => "real_estate",
        WorkingCapital => "working_capital",
        Other => "other",
    }
}

text_enum! {
    pub enum LeadSource {
        Website => "website",
        Referral => "referral",
        ColdCall => "cold_call",
        Email => "email",
        Other => "other",
    }
}

/// Which leads a list call may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadScope {
    All,
    ReferredBy(Uuid),
    ReferredByOrAssignedTo(Uuid),
}

pub fn lead_scope(actor: &AuthenticatedUser) -> LeadScope {
    match actor.role {
        Role::Admin => LeadScope::All,
        Role::Referrer => LeadScope::ReferredBy(actor.user_id),
        Role::User => LeadScope::ReferredByOrAssignedTo(actor.user_id),
    }
}

/// Admins, the lead's referrer and its assignee may change the lead.
pub fn can_manage_lead(
    actor: &AuthenticatedUser,
    referrer_id: Option<Uuid>,
    assigned_to: Option<Uuid>,
) -> bool {
    actor.role == Role::Admin
        || referrer_id == Some(actor.user_id)
        || assigned_to == Some(actor.user_id)
}
