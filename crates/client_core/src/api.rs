use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use shared::{
    domain::{Identity, PendingFormEdits, SignInRequest, UserId},
    error::ApiError,
    protocol::{
        delete_user_route, rejection_message, sign_in_route, sign_out_route, update_user_route,
    },
};

use crate::{
    config::{normalize_base_url, ConfigError},
    error::MutationError,
};

#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn sign_in(&self, request: &SignInRequest) -> Result<Identity, MutationError>;
    async fn update_profile(
        &self,
        id: &UserId,
        edits: &PendingFormEdits,
    ) -> Result<Identity, MutationError>;
    async fn delete_account(&self, id: &UserId) -> Result<(), MutationError>;
    async fn sign_out(&self) -> Result<(), MutationError>;
}

pub struct HttpProfileApi {
    http: Client,
    base_url: String,
}

impl HttpProfileApi {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }
}

#[async_trait]
impl ProfileApi for HttpProfileApi {
    async fn sign_in(&self, request: &SignInRequest) -> Result<Identity, MutationError> {
        let response = self
            .http
            .post(self.url(sign_in_route()))
            .json(request)
            .send()
            .await?;
        decode_identity(read_body(response).await?)
    }

    async fn update_profile(
        &self,
        id: &UserId,
        edits: &PendingFormEdits,
    ) -> Result<Identity, MutationError> {
        let response = self
            .http
            .post(self.url(&update_user_route(id)))
            .json(edits)
            .send()
            .await?;
        decode_identity(read_body(response).await?)
    }

    async fn delete_account(&self, id: &UserId) -> Result<(), MutationError> {
        let response = self
            .http
            .delete(self.url(&delete_user_route(id)))
            .send()
            .await?;
        read_body(response).await.map(|_| ())
    }

    async fn sign_out(&self) -> Result<(), MutationError> {
        let response = self.http.get(self.url(sign_out_route())).send().await?;
        read_body(response).await.map(|_| ())
    }
}

/// JSON body of a successful call. Non-2xx statuses and `"success": false` bodies
/// become [`MutationError::Application`].
async fn read_body(response: Response) -> Result<Value, MutationError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body = serde_json::from_slice::<Value>(&bytes).ok();

    if !status.is_success() {
        let message = body
            .as_ref()
            .and_then(ApiError::from_body)
            .map(|error| error.message)
            .unwrap_or_else(|| format!("server returned {status}"));
        return Err(MutationError::Application {
            status: Some(status.as_u16()),
            message,
        });
    }

    let body = body.ok_or_else(|| MutationError::Decode("response body is not JSON".into()))?;
    if let Some(message) = rejection_message(&body) {
        return Err(MutationError::Application {
            status: Some(status.as_u16()),
            message,
        });
    }
    Ok(body)
}

fn decode_identity(body: Value) -> Result<Identity, MutationError> {
    serde_json::from_value(body).map_err(|e| MutationError::Decode(e.to_string()))
}
