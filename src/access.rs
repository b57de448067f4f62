//! Roles and the field-level capability table.
//!
//! Every patch-style operation filters its input through [`writable_patch`]
//! once, so the allow-lists for each role live in [`CAPABILITIES`] only.
//! Relationship checks (owner, referrer, assignee) happen in the handlers
//! before the table is consulted.

use serde_json::{Map, Value};

use crate::utils::text_enum::text_enum;

text_enum! {
    pub enum Role {
        Admin => "admin",
        Referrer => "referrer",
        User => "user",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Lead,
    /// Fields that can only be chosen when a lead is created.
    NewLead,
    User,
    Commission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    None,
    Read,
    Write,
}

struct Capability {
    entity: Entity,
    field: &'static str,
    roles: &'static [Role],
    access: Access,
}

const ANY_ROLE: &[Role] = &[Role::Admin, Role::Referrer, Role::User];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

const fn cap(
    entity: Entity,
    field: &'static str,
    roles: &'static [Role],
    access: Access,
) -> Capability {
    Capability {
        entity,
        field,
        roles,
        access,
    }
}

static CAPABILITIES: &[Capability] = &[
    cap(Entity::Lead, "name", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "email", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "phone", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "company", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "loanAmount", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "loanType", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "status", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "assignedTo", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "expectedCloseDate", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "source", ANY_ROLE, Access::Write),
    cap(Entity::Lead, "referrer", ANY_ROLE, Access::Read),
    cap(Entity::Lead, "notes", ANY_ROLE, Access::Read),
    cap(Entity::Lead, "documents", ANY_ROLE, Access::Read),
    cap(Entity::NewLead, "referrer", ADMIN_ONLY, Access::Write),
    cap(Entity::User, "name", ANY_ROLE, Access::Write),
    cap(Entity::User, "email", ANY_ROLE, Access::Write),
    cap(Entity::User, "role", ANY_ROLE, Access::Read),
    cap(Entity::User, "role", ADMIN_ONLY, Access::Write),
    cap(Entity::User, "commissionRate", ANY_ROLE, Access::Read),
    cap(Entity::User, "commissionRate", ADMIN_ONLY, Access::Write),
    cap(Entity::User, "active", ANY_ROLE, Access::Read),
    cap(Entity::User, "active", ADMIN_ONLY, Access::Write),
    cap(Entity::User, "totalCommissionEarned", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "status", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "status", ADMIN_ONLY, Access::Write),
    cap(Entity::Commission, "notes", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "notes", ADMIN_ONLY, Access::Write),
    cap(Entity::Commission, "loanAmount", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "loanAmount", ADMIN_ONLY, Access::Write),
    cap(Entity::Commission, "rate", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "rate", ADMIN_ONLY, Access::Write),
    cap(Entity::Commission, "amount", ANY_ROLE, Access::Read),
    cap(Entity::Commission, "paidAt", ANY_ROLE, Access::Read),
];

pub fn field_access(role: Role, entity: Entity, field: &str) -> Access {
    CAPABILITIES
        .iter()
        .filter(|cap| cap.entity == entity && cap.field == field && cap.roles.contains(&role))
        .map(|cap| cap.access)
        .max()
        .unwrap_or(Access::None)
}

pub fn can_write(role: Role, entity: Entity, field: &str) -> bool {
    field_access(role, entity, field) == Access::Write
}

/// Keeps the keys of `patch` the role may write; everything else is dropped
/// without error.
pub fn writable_patch(role: Role, entity: Entity, patch: &Map<String, Value>) -> Map<String, Value> {
    patch
        .iter()
        .filter(|(field, _)| can_write(role, entity, field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}
