use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;

/// JSON body that has passed its `validator` rules.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::bad_request(rejection.body_text()))?;
        let value: T = serde_path_to_error::deserialize(body).map_err(field_error)?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Pins a deserialization failure to the offending key. Missing keys are
/// reported at the parent path, so their name comes from the message.
fn field_error(err: serde_path_to_error::Error<serde_json::Error>) -> AppError {
    let path = err.path().to_string();
    let message = err.inner().to_string();
    let missing = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next());

    match (path.as_str(), missing) {
        (".", Some(field)) => AppError::invalid_field(field, "field is required"),
        (".", None) => AppError::bad_request(message),
        (parent, Some(field)) => {
            AppError::invalid_field(format!("{parent}.{field}"), "field is required")
        }
        (field, None) => AppError::invalid_field(field, message),
    }
}
