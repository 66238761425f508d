use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use shared::domain::{AvatarReference, Credential, Identity, PendingFormEdits, SignInRequest};
use tokio::sync::mpsc;
use tracing::info;

pub mod api;
pub mod blob_store;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod upload;

pub use api::{HttpProfileApi, ProfileApi};
pub use blob_store::{BlobStore, HttpBlobStore};
pub use config::{ClientSettings, ConfigError};
pub use dispatcher::MutationDispatcher;
pub use error::MutationError;
pub use session::{
    reduce, MutationKind, MutationOutcome, MutationStatus, SessionEvent, SessionState,
    SessionStore,
};
pub use upload::{
    FileBlob, ProgressEvent, UploadCoordinator, UploadFailure, UploadHandle, UploadOutcome,
    UploadState,
};

/// Uploaded avatars land in the pending edits; only a successful profile update
/// commits edits to the session identity.
pub struct ProfileClient {
    dispatcher: MutationDispatcher,
    uploads: UploadCoordinator,
    edits: Mutex<PendingFormEdits>,
}

impl ProfileClient {
    pub fn new(
        api: Arc<dyn ProfileApi>,
        blob_store: Arc<dyn BlobStore>,
        settings: &ClientSettings,
    ) -> Self {
        Self::with_session(api, blob_store, SessionStore::new(), settings)
    }

    pub fn with_session(
        api: Arc<dyn ProfileApi>,
        blob_store: Arc<dyn BlobStore>,
        session: Arc<SessionStore>,
        settings: &ClientSettings,
    ) -> Self {
        Self {
            dispatcher: MutationDispatcher::new(api, session, settings.request_timeout()),
            uploads: UploadCoordinator::new(
                blob_store,
                settings.upload_chunk_bytes,
                settings.request_timeout(),
            ),
            edits: Mutex::new(PendingFormEdits::default()),
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let api = HttpProfileApi::new(&settings.api_base_url)?;
        let blob_store = HttpBlobStore::new(&settings.storage_base_url);
        Ok(Self::new(Arc::new(api), Arc::new(blob_store), settings))
    }

    fn lock_edits(&self) -> MutexGuard<'_, PendingFormEdits> {
        self.edits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        self.dispatcher.store()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionState> {
        self.session().subscribe()
    }

    pub fn edits(&self) -> PendingFormEdits {
        self.lock_edits().clone()
    }

    pub fn edit(&self, change: PendingFormEdits) {
        self.lock_edits().merge(change);
    }

    /// Leaving the profile screen: unsubmitted edits and upload state are dropped.
    pub fn discard_edits(&self) {
        *self.lock_edits() = PendingFormEdits::default();
        self.uploads.reset();
    }

    pub fn upload_state(&self) -> Option<UploadState> {
        self.uploads.state()
    }

    pub fn select_avatar(&self, blob: FileBlob) -> UploadHandle {
        self.uploads.begin_upload(blob)
    }

    /// Records a completed upload in the pending edits, unless a newer file has been
    /// selected since. Returns whether the edits changed.
    pub fn apply_upload_event(&self, generation: u64, event: &ProgressEvent) -> bool {
        let ProgressEvent::Completed(reference) = event else {
            return false;
        };
        let mut edits = self.lock_edits();
        if !self.uploads.is_current(generation) {
            return false;
        }
        edits.avatar = Some(reference.clone());
        true
    }

    pub async fn upload_avatar(&self, blob: FileBlob) -> Result<AvatarReference, UploadFailure> {
        let mut handle = self.select_avatar(blob);
        let generation = handle.generation();
        while let Some(event) = handle.next().await {
            self.apply_upload_event(generation, &event);
            match event {
                ProgressEvent::Progress(_) => {}
                ProgressEvent::Failure(failure) => return Err(failure),
                ProgressEvent::Completed(reference) => return Ok(reference),
            }
        }
        Err(UploadFailure::Cancelled)
    }

    pub async fn sign_in(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Identity, MutationError> {
        let identity = self
            .dispatcher
            .sign_in(SignInRequest {
                email: email.into(),
                password: Credential::new(password),
            })
            .await?;
        info!(user_id = %identity.id, "profile: signed in");
        Ok(identity)
    }

    pub async fn submit_profile(&self) -> Result<Identity, MutationError> {
        let identity = self.session().require_identity()?;
        let submitted = self.edits();
        let updated = self
            .dispatcher
            .update_profile(&identity.id, submitted.clone())
            .await?;
        self.lock_edits().clear_submitted(&submitted);
        Ok(updated)
    }

    pub async fn delete_account(&self) -> Result<(), MutationError> {
        let identity = self.session().require_identity()?;
        self.dispatcher.delete_account(&identity.id).await?;
        self.discard_edits();
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), MutationError> {
        self.dispatcher.sign_out().await?;
        self.discard_edits();
        Ok(())
    }

    pub fn acknowledge(&self) -> Option<SessionState> {
        self.session().acknowledge()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
