use std::{future::Future, sync::Arc, time::Duration};

use shared::domain::{Identity, PendingFormEdits, SignInRequest, UserId};
use tracing::{info, warn};

use crate::{
    api::ProfileApi,
    error::MutationError,
    session::{MutationKind, MutationOutcome, SessionEvent, SessionStore},
};

/// A call made while another mutation is pending is rejected with
/// [`MutationError::Busy`] and leaves the session untouched.
pub struct MutationDispatcher {
    api: Arc<dyn ProfileApi>,
    store: Arc<SessionStore>,
    timeout: Duration,
}

/// Fails the pending mutation if the caller drops the future before it resolves.
struct PendingGuard<'a> {
    store: &'a SessionStore,
    kind: MutationKind,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(kind = self.kind.as_str(), "profile: mutation abandoned");
            self.store
                .dispatch(SessionEvent::MutationFailure("cancelled".into()));
        }
    }
}

impl MutationDispatcher {
    pub fn new(api: Arc<dyn ProfileApi>, store: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            api,
            store,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn sign_in(&self, request: SignInRequest) -> Result<Identity, MutationError> {
        self.run(
            MutationKind::SignIn,
            self.api.sign_in(&request),
            |identity| MutationOutcome::IdentityReplaced(identity.clone()),
        )
        .await
    }

    pub async fn update_profile(
        &self,
        id: &UserId,
        edits: PendingFormEdits,
    ) -> Result<Identity, MutationError> {
        self.run(
            MutationKind::UpdateProfile,
            self.api.update_profile(id, &edits),
            |identity| MutationOutcome::IdentityReplaced(identity.clone()),
        )
        .await
    }

    pub async fn delete_account(&self, id: &UserId) -> Result<(), MutationError> {
        self.run(
            MutationKind::DeleteAccount,
            self.api.delete_account(id),
            |_| MutationOutcome::IdentityCleared,
        )
        .await
    }

    pub async fn sign_out(&self) -> Result<(), MutationError> {
        self.run(MutationKind::SignOut, self.api.sign_out(), |_| {
            MutationOutcome::IdentityCleared
        })
        .await
    }

    async fn run<T, F>(
        &self,
        kind: MutationKind,
        call: F,
        outcome: impl FnOnce(&T) -> MutationOutcome,
    ) -> Result<T, MutationError>
    where
        F: Future<Output = Result<T, MutationError>>,
    {
        if let Err(err) = self.store.try_begin(kind) {
            warn!(kind = kind.as_str(), "profile: rejected while another mutation is pending");
            return Err(err);
        }
        let mut guard = PendingGuard {
            store: &self.store,
            kind,
            armed: true,
        };

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(MutationError::Timeout),
        };
        guard.armed = false;

        match result {
            Ok(value) => {
                info!(kind = kind.as_str(), "profile: mutation succeeded");
                self.store
                    .dispatch(SessionEvent::MutationSuccess(outcome(&value)));
                Ok(value)
            }
            Err(err) => {
                warn!(kind = kind.as_str(), error = %err, "profile: mutation failed");
                self.store
                    .dispatch(SessionEvent::MutationFailure(err.message()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
