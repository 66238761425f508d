use async_trait::async_trait;
use reqwest::{header::CONTENT_RANGE, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::AvatarReference,
    error::ApiError,
    protocol::{
        content_range, finalize_upload_route, open_upload_route, upload_chunk_route, ChunkAck,
        FinalizeUploadResponse, OpenUploadQuery, OpenUploadResponse, UPLOAD_CONTENT_LENGTH_HEADER,
        UPLOAD_CONTENT_TYPE_HEADER,
    },
};

use crate::{
    config::normalize_base_url,
    upload::{FileBlob, UploadFailure},
};

/// Size and content-type rules live on the store; violations come back as
/// [`UploadFailure::Rejected`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn open(&self, key: &str, blob: &FileBlob) -> Result<String, UploadFailure>;
    /// Sends `chunk` starting at `offset` and returns the number of bytes the store
    /// now holds for the session.
    async fn put_chunk(
        &self,
        session_id: &str,
        offset: u64,
        chunk: &[u8],
        total: u64,
    ) -> Result<u64, UploadFailure>;
    async fn finalize(&self, session_id: &str) -> Result<AvatarReference, UploadFailure>;
}

pub struct HttpBlobStore {
    http: Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
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
impl BlobStore for HttpBlobStore {
    async fn open(&self, key: &str, blob: &FileBlob) -> Result<String, UploadFailure> {
        let response = self
            .http
            .post(self.url(open_upload_route()))
            .query(&OpenUploadQuery {
                name: key.to_string(),
            })
            .header(UPLOAD_CONTENT_TYPE_HEADER, blob.content_type.as_str())
            .header(UPLOAD_CONTENT_LENGTH_HEADER, blob.size().to_string())
            .send()
            .await?;
        let opened: OpenUploadResponse = read_json(response).await?;
        Ok(opened.session_id)
    }

    async fn put_chunk(
        &self,
        session_id: &str,
        offset: u64,
        chunk: &[u8],
        total: u64,
    ) -> Result<u64, UploadFailure> {
        let response = self
            .http
            .put(self.url(&upload_chunk_route(session_id)))
            .header(
                CONTENT_RANGE,
                content_range(offset, chunk.len() as u64, total),
            )
            .body(chunk.to_vec())
            .send()
            .await?;
        let ack: ChunkAck = read_json(response).await?;
        Ok(ack.received)
    }

    async fn finalize(&self, session_id: &str) -> Result<AvatarReference, UploadFailure> {
        let response = self
            .http
            .post(self.url(&finalize_upload_route(session_id)))
            .send()
            .await?;
        let finalized: FinalizeUploadResponse = read_json(response).await?;
        if finalized.download_url.trim().is_empty() {
            return Err(UploadFailure::Decode("blob store returned an empty download url".into()));
        }
        Ok(AvatarReference(finalized.download_url))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, UploadFailure> {
    let status = response.status();
    if !status.is_success() {
        let bytes = response.bytes().await?;
        let message = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .as_ref()
            .and_then(ApiError::from_body)
            .map(|error| error.message)
            .unwrap_or_else(|| format!("blob store returned {status}"));
        return Err(UploadFailure::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| UploadFailure::Decode(e.to_string()))
}
