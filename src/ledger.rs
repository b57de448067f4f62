//! Commission amounts, status rules and running-total accounting.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use thiserror::Error;
use validator::ValidationError;

use crate::utils::text_enum::text_enum;

text_enum! {
    pub enum CommissionStatus {
        Pending => "pending",
        Approved => "approved",
        Paid => "paid",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("a paid commission can only leave the paid status by being deleted")]
    LeavesPaid,
    #[error("loan amount and rate of a paid commission are fixed")]
    PaidTermsLocked,
    #[error("commission amount is out of range")]
    AmountOverflow,
}

/// Upper bound for any loan amount accepted from a client (10^15).
pub const MAX_LOAN_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);

/// `loanAmount * rate / 100`, exact.
pub fn commission_amount(loan_amount: Decimal, rate: Decimal) -> Result<Decimal, LedgerError> {
    loan_amount
        .checked_mul(rate)
        .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(LedgerError::AmountOverflow)
}

/// Signed change to the referrer's running total for a status change.
/// `None` stands for "no record": creation on the left, deletion on the right.
pub fn running_total_delta(
    from: Option<CommissionStatus>,
    to: Option<CommissionStatus>,
    amount: Decimal,
) -> Decimal {
    let was_paid = from == Some(CommissionStatus::Paid);
    let is_paid = to == Some(CommissionStatus::Paid);
    match (was_paid, is_paid) {
        (false, true) => amount,
        (true, false) => -amount,
        _ => Decimal::ZERO,
    }
}

/// Status changes allowed through the update operation.
pub fn check_status_change(
    from: CommissionStatus,
    to: CommissionStatus,
) -> Result<(), LedgerError> {
    if from == CommissionStatus::Paid && to != CommissionStatus::Paid {
        return Err(LedgerError::LeavesPaid);
    }
    Ok(())
}

pub fn check_terms_change(status: CommissionStatus) -> Result<(), LedgerError> {
    if status == CommissionStatus::Paid {
        return Err(LedgerError::PaidTermsLocked);
    }
    Ok(())
}

/// Per-bucket sums over one list result.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionTotals {
    pub total: Decimal,
    pub pending: Decimal,
    pub approved: Decimal,
    pub paid: Decimal,
}

impl CommissionTotals {
    pub fn add(&mut self, status: CommissionStatus, amount: Decimal) {
        self.total = self.total.saturating_add(amount);
        let bucket = match status {
            CommissionStatus::Pending => &mut self.pending,
            CommissionStatus::Approved => &mut self.approved,
            CommissionStatus::Paid => &mut self.paid,
            CommissionStatus::Cancelled => return,
        };
        *bucket = bucket.saturating_add(amount);
    }
}

impl FromIterator<(CommissionStatus, Decimal)> for CommissionTotals {
    fn from_iter<I: IntoIterator<Item = (CommissionStatus, Decimal)>>(iter: I) -> Self {
        let mut totals = CommissionTotals::default();
        for (status, amount) in iter {
            totals.add(status, amount);
        }
        totals
    }
}

pub fn validate_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if *rate < Decimal::ZERO || *rate > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("range");
        err.message = Some("rate must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

pub fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        let mut err = ValidationError::new("range");
        err.message = Some("amount must not be negative".into());
        return Err(err);
    }
    if *amount > MAX_LOAN_AMOUNT {
        let mut err = ValidationError::new("range");
        err.message = Some("amount must not exceed 1000000000000000".into());
        return Err(err);
    }
    Ok(())
}

/// A referrer whose stored running total disagrees with their paid commissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalMismatch {
    pub referrer_id: Uuid,
    pub stored: Decimal,
    pub paid_sum: Decimal,
}

/// Compares stored running totals with the paid commission amounts. Only
/// reports; totals move through [`running_total_delta`] alone.
pub fn audit_running_totals(
    paid: impl IntoIterator<Item = (Uuid, Decimal)>,
    stored: impl IntoIterator<Item = (Uuid, Decimal)>,
) -> Vec<TotalMismatch> {
    let mut sums: HashMap<Uuid, Decimal> = HashMap::new();
    for (referrer_id, amount) in paid {
        let entry = sums.entry(referrer_id).or_default();
        *entry = entry.saturating_add(amount);
    }
    stored
        .into_iter()
        .filter_map(|(referrer_id, stored)| {
            let paid_sum = sums.get(&referrer_id).copied().unwrap_or_default();
            (stored != paid_sum).then_some(TotalMismatch {
                referrer_id,
                stored,
                paid_sum,
            })
        })
        .collect()
}
