use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    PayloadTooLarge,
    UnsupportedMediaType,
    Internal,
}

/// Error body returned by the listing API and the blob store.
///
/// The listing API answers `{ "success": false, "statusCode": 401, "message": "..." }`;
/// the blob store answers `{ "code": "payload_too_large", "message": "..." }`. Both
/// shapes deserialize into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
    #[serde(default)]
    pub success: bool,
    #[serde(
        rename = "statusCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Reads an error body field by field, so an unknown `code` (a driver's numeric
    /// error code, say) or a missing `statusCode` does not hide the server's message.
    pub fn from_body(body: &Value) -> Option<Self> {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())?;
        Some(Self {
            success: body.get("success").and_then(Value::as_bool).unwrap_or(false),
            status_code: body
                .get("statusCode")
                .and_then(Value::as_u64)
                .and_then(|status| u16::try_from(status).ok()),
            code: body
                .get("code")
                .and_then(|code| serde_json::from_value(code.clone()).ok()),
            message: message.to_string(),
        })
    }
}
