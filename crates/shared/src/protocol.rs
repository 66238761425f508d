use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::UserId;

pub const UPLOAD_CONTENT_TYPE_HEADER: &str = "x-upload-content-type";
pub const UPLOAD_CONTENT_LENGTH_HEADER: &str = "x-upload-content-length";

pub fn update_user_route(id: &UserId) -> String {
    format!("/api/user/update/{id}")
}

pub fn delete_user_route(id: &UserId) -> String {
    format!("/api/user/delete/{id}")
}

pub fn sign_in_route() -> &'static str {
    "/api/auth/signin"
}

pub fn sign_out_route() -> &'static str {
    "/api/auth/signout"
}

pub fn open_upload_route() -> &'static str {
    "/uploads"
}

pub fn upload_chunk_route(session_id: &str) -> String {
    format!("/uploads/{session_id}")
}

pub fn finalize_upload_route(session_id: &str) -> String {
    format!("/uploads/{session_id}/finalize")
}

/// Application-level rejection carried in an otherwise well-formed body.
///
/// The listing API signals failure with `"success": false`; any other value
/// (including a missing flag) counts as success.
pub fn rejection_message(body: &Value) -> Option<String> {
    if body.get("success").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or("request rejected");
    Some(message.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenUploadQuery {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenUploadResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    pub received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    pub download_url: String,
}

/// `content-range` value for a chunk covering `[start, start + len)` of `total` bytes.
pub fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        return format!("bytes */{total}");
    }
    format!("bytes {}-{}/{}", start, start + len - 1, total)
}
