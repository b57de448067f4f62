use validator::{ValidateEmail, ValidationError};

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Lower-cased, trimmed email, or `None` when it is not an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    email.validate_email().then_some(email)
}
