use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable address of an uploaded avatar image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvatarReference(pub String);

impl AvatarReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AvatarReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque credential as received from the backend or typed by the user.
///
/// Deserializes from a plain string but is never serialized back as part of an
/// [`Identity`], and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The authenticated user's profile record held client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarReference>,
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "updatedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields the user changed but has not submitted yet.
///
/// Serializes to the partial JSON body of a profile update: absent fields are
/// omitted so the backend keeps their stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingFormEdits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_credential"
    )]
    pub password: Option<Credential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarReference>,
}

impl PendingFormEdits {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.avatar.is_none()
    }

    /// Field-by-field overlay; `other` wins where it carries a value.
    pub fn merge(&mut self, other: PendingFormEdits) {
        if other.username.is_some() {
            self.username = other.username;
        }
        if other.email.is_some() {
            self.email = other.email;
        }
        if other.password.is_some() {
            self.password = other.password;
        }
        if other.avatar.is_some() {
            self.avatar = other.avatar;
        }
    }

    /// Drops the fields whose value was committed by `submitted`, keeping edits made
    /// while the update was in flight.
    pub fn clear_submitted(&mut self, submitted: &PendingFormEdits) {
        if self.username.is_some() && self.username == submitted.username {
            self.username = None;
        }
        if self.email.is_some() && self.email == submitted.email {
            self.email = None;
        }
        if self.password.is_some() && self.password == submitted.password {
            self.password = None;
        }
        if self.avatar.is_some() && self.avatar == submitted.avatar {
            self.avatar = None;
        }
    }
}

fn serialize_credential<S>(value: &Option<Credential>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(credential) => serializer.serialize_str(credential.expose()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest {
    pub email: String,
    #[serde(serialize_with = "serialize_plain_credential")]
    pub password: Credential,
}

fn serialize_plain_credential<S>(value: &Credential, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(value.expose())
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
