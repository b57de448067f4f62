//! Signature workflow state machine.
//!
//! A document's overall status is derived from its signer roster by
//! [`derive_status`]; handlers never assign it directly except for the
//! initial `draft` and the explicit send transition in [`status_after_send`].

use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::models::DocumentSigner;
use crate::utils::text_enum::text_enum;

text_enum! {
    pub enum DocumentStatus {
        Draft => "draft",
        Pending => "pending",
        PartiallySigned => "partially_signed",
        Completed => "completed",
        Declined => "declined",
    }
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Declined)
    }
}

text_enum! {
    pub enum SignerStatus {
        Pending => "pending",
        Signed => "signed",
        Declined => "declined",
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("you are not a signer of this document")]
    NotASigner,
    #[error("document already signed")]
    AlreadySigned,
    #[error("document already declined")]
    AlreadyDeclined,
    #[error("document is {0} and no longer accepts signatures")]
    Closed(DocumentStatus),
}

/// What a signer does with their slot.
#[derive(Debug, Clone)]
pub enum Decision {
    Sign { signature_data: String },
    Decline,
}

/// Result of applying a [`Decision`] to a roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub signer_index: usize,
    pub status: DocumentStatus,
    pub completed_at: Option<NaiveDateTime>,
}

/// Overall status implied by the signer statuses.
///
/// Any decline wins. `completed` needs a non-empty roster that is fully
/// signed, so a document without signers can never complete here.
pub fn derive_status(signers: &[SignerStatus]) -> DocumentStatus {
    if signers.contains(&SignerStatus::Declined) {
        DocumentStatus::Declined
    } else if !signers.is_empty() && signers.iter().all(|s| *s == SignerStatus::Signed) {
        DocumentStatus::Completed
    } else if signers.contains(&SignerStatus::Signed) {
        DocumentStatus::PartiallySigned
    } else {
        DocumentStatus::Pending
    }
}

/// Status written by the send operation. Terminal documents reject the send.
pub fn status_after_send(
    current: DocumentStatus,
    signers: &[SignerStatus],
) -> Result<DocumentStatus, DocumentStatus> {
    if current.is_terminal() {
        return Err(current);
    }
    if signers.contains(&SignerStatus::Signed) {
        Ok(DocumentStatus::PartiallySigned)
    } else {
        Ok(DocumentStatus::Pending)
    }
}

/// Locates the actor's slot: user reference first, then email.
pub fn find_signer(signers: &[DocumentSigner], user_id: Uuid, email: &str) -> Option<usize> {
    signers
        .iter()
        .position(|s| s.user_id == Some(user_id))
        .or_else(|| {
            signers
                .iter()
                .position(|s| s.email.eq_ignore_ascii_case(email))
        })
}

pub fn is_participant(signers: &[DocumentSigner], user_id: Uuid, email: &str) -> bool {
    find_signer(signers, user_id, email).is_some()
}

/// Applies `decision` to the actor's slot in place and recomputes the overall
/// status. The roster is left untouched when an error is returned.
pub fn apply_decision(
    current: DocumentStatus,
    signers: &mut [DocumentSigner],
    user_id: Uuid,
    email: &str,
    decision: Decision,
    now: NaiveDateTime,
) -> Result<Transition, SignError> {
    let index = find_signer(signers, user_id, email).ok_or(SignError::NotASigner)?;

    match signers[index].status {
        SignerStatus::Signed => return Err(SignError::AlreadySigned),
        SignerStatus::Declined => return Err(SignError::AlreadyDeclined),
        SignerStatus::Pending => {}
    }

    if current.is_terminal() {
        return Err(SignError::Closed(current));
    }

    let slot = &mut signers[index];
    match decision {
        Decision::Sign { signature_data } => {
            slot.status = SignerStatus::Signed;
            slot.signed_at = Some(now);
            slot.signature_data = Some(signature_data);
        }
        Decision::Decline => {
            slot.status = SignerStatus::Declined;
        }
    }

    let statuses: Vec<SignerStatus> = signers.iter().map(|s| s.status).collect();
    let status = derive_status(&statuses);
    let completed_at = (status == DocumentStatus::Completed).then_some(now);

    Ok(Transition {
        signer_index: index,
        status,
        completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn signer(position: i32, email: &str, user_id: Option<Uuid>) -> DocumentSigner {
        DocumentSigner {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            position,
            user_id,
            email: email.to_string(),
            name: email.to_string(),
            status: SignerStatus::Pending,
            signed_at: None,
            signature_data: None,
        }
    }

    fn sign(data: &str) -> Decision {
        Decision::Sign {
            signature_data: data.to_string(),
        }
    }

    #[test]
    fn empty_roster_never_completes() {
        assert_eq!(derive_status(&[]), DocumentStatus::Pending);
    }

    #[test]
    fn completed_only_when_all_signed() {
        use SignerStatus::*;
        assert_eq!(derive_status(&[Signed]), DocumentStatus::Completed);
        assert_eq!(derive_status(&[Signed, Signed]), DocumentStatus::Completed);
        assert_eq!(
            derive_status(&[Signed, Pending]),
            DocumentStatus::PartiallySigned
        );
        assert_eq!(derive_status(&[Pending, Pending]), DocumentStatus::Pending);
    }

    #[test]
    fn any_decline_declines_the_document() {
        use SignerStatus::*;
        assert_eq!(
            derive_status(&[Signed, Declined]),
            DocumentStatus::Declined
        );
    }

    #[test]
    fn send_moves_draft_to_pending_even_without_signers() {
        assert_eq!(
            status_after_send(DocumentStatus::Draft, &[]),
            Ok(DocumentStatus::Pending)
        );
    }

    #[test]
    fn resend_keeps_partial_progress_and_rejects_terminal_documents() {
        use SignerStatus::*;
        assert_eq!(
            status_after_send(DocumentStatus::PartiallySigned, &[Signed, Pending]),
            Ok(DocumentStatus::PartiallySigned)
        );
        assert_eq!(
            status_after_send(DocumentStatus::Completed, &[Signed]),
            Err(DocumentStatus::Completed)
        );
    }

    #[test]
    fn matches_by_user_before_email() {
        let user = Uuid::new_v4();
        let roster = vec![
            signer(0, "shared@example.com", None),
            signer(1, "other@example.com", Some(user)),
        ];
        assert_eq!(find_signer(&roster, user, "shared@example.com"), Some(1));
        assert_eq!(
            find_signer(&roster, Uuid::new_v4(), "SHARED@example.com"),
            Some(0)
        );
        assert_eq!(find_signer(&roster, Uuid::new_v4(), "nobody@example.com"), None);
    }

    #[test]
    fn signing_walks_through_partial_to_completed() {
        let now = Utc::now().naive_utc();
        let mut roster = vec![signer(0, "a@example.com", None), signer(1, "b@example.com", None)];

        let first = apply_decision(
            DocumentStatus::Pending,
            &mut roster,
            Uuid::new_v4(),
            "a@example.com",
            sign("sig-a"),
            now,
        )
        .unwrap();
        assert_eq!(first.status, DocumentStatus::PartiallySigned);
        assert_eq!(first.completed_at, None);

        let second = apply_decision(
            first.status,
            &mut roster,
            Uuid::new_v4(),
            "b@example.com",
            sign("sig-b"),
            now,
        )
        .unwrap();
        assert_eq!(second.status, DocumentStatus::Completed);
        assert_eq!(second.completed_at, Some(now));
    }

    #[test]
    fn second_signature_conflicts_and_keeps_the_first() {
        let first_at = Utc::now().naive_utc();
        let mut roster = vec![signer(0, "a@example.com", None), signer(1, "b@example.com", None)];
        let actor = Uuid::new_v4();
        apply_decision(
            DocumentStatus::Pending,
            &mut roster,
            actor,
            "a@example.com",
            sign("original"),
            first_at,
        )
        .unwrap();

        let later = first_at + chrono::Duration::minutes(5);
        let err = apply_decision(
            DocumentStatus::PartiallySigned,
            &mut roster,
            actor,
            "a@example.com",
            sign("replacement"),
            later,
        )
        .unwrap_err();
        assert_eq!(err, SignError::AlreadySigned);
        assert_eq!(roster[0].signed_at, Some(first_at));
        assert_eq!(roster[0].signature_data.as_deref(), Some("original"));
    }

    #[test]
    fn outsiders_cannot_sign() {
        let mut roster = vec![signer(0, "a@example.com", None)];
        let err = apply_decision(
            DocumentStatus::Pending,
            &mut roster,
            Uuid::new_v4(),
            "z@example.com",
            sign("x"),
            Utc::now().naive_utc(),
        )
        .unwrap_err();
        assert_eq!(err, SignError::NotASigner);
    }

    #[test]
    fn zero_signers_cannot_complete_through_signing() {
        let mut roster: Vec<DocumentSigner> = Vec::new();
        let err = apply_decision(
            DocumentStatus::Pending,
            &mut roster,
            Uuid::new_v4(),
            "a@example.com",
            sign("x"),
            Utc::now().naive_utc(),
        )
        .unwrap_err();
        assert_eq!(err, SignError::NotASigner);
    }

    #[test]
    fn decline_is_terminal_for_remaining_signers() {
        let now = Utc::now().naive_utc();
        let mut roster = vec![signer(0, "a@example.com", None), signer(1, "b@example.com", None)];
        let declined = apply_decision(
            DocumentStatus::Pending,
            &mut roster,
            Uuid::new_v4(),
            "a@example.com",
            Decision::Decline,
            now,
        )
        .unwrap();
        assert_eq!(declined.status, DocumentStatus::Declined);

        let err = apply_decision(
            declined.status,
            &mut roster,
            Uuid::new_v4(),
            "b@example.com",
            sign("late"),
            now,
        )
        .unwrap_err();
        assert_eq!(err, SignError::Closed(DocumentStatus::Declined));
        assert_eq!(roster[1].status, SignerStatus::Pending);
    }
}
