use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::domain::Identity;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::MutationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    SignIn,
    UpdateProfile,
    DeleteAccount,
    SignOut,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignIn => "sign_in",
            Self::UpdateProfile => "update_profile",
            Self::DeleteAccount => "delete_account",
            Self::SignOut => "sign_out",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending(MutationKind),
    Succeeded(MutationKind),
    Failed {
        kind: MutationKind,
        message: String,
    },
}

impl MutationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    IdentityReplaced(Identity),
    IdentityCleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MutationStart(MutationKind),
    MutationSuccess(MutationOutcome),
    MutationFailure(String),
    Acknowledge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub status: MutationStatus,
    pub revision: u64,
}

impl SessionState {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }
}

/// Next state for `event`. Events that are not valid in the current status return
/// an identical state, including the revision.
pub fn reduce(state: &SessionState, event: &SessionEvent) -> SessionState {
    let (identity, status) = match (&state.status, event) {
        (MutationStatus::Pending(_), SessionEvent::MutationStart(_)) => return state.clone(),
        (_, SessionEvent::MutationStart(kind)) => {
            (state.identity.clone(), MutationStatus::Pending(*kind))
        }
        (MutationStatus::Pending(kind), SessionEvent::MutationSuccess(outcome)) => {
            let identity = match outcome {
                MutationOutcome::IdentityReplaced(identity) => Some(identity.clone()),
                MutationOutcome::IdentityCleared => None,
            };
            (identity, MutationStatus::Succeeded(*kind))
        }
        (MutationStatus::Pending(kind), SessionEvent::MutationFailure(message)) => (
            state.identity.clone(),
            MutationStatus::Failed {
                kind: *kind,
                message: message.clone(),
            },
        ),
        (
            MutationStatus::Succeeded(_) | MutationStatus::Failed { .. },
            SessionEvent::Acknowledge,
        ) => (state.identity.clone(), MutationStatus::Idle),
        _ => return state.clone(),
    };

    SessionState {
        identity,
        status,
        revision: state.revision + 1,
    }
}

struct StoreInner {
    state: SessionState,
    subscribers: Vec<mpsc::UnboundedSender<SessionState>>,
}

pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Self::with_state(SessionState::default())
    }

    pub fn with_state(state: SessionState) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StoreInner {
                state,
                subscribers: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().state.identity.clone()
    }

    pub fn require_identity(&self) -> Result<Identity, MutationError> {
        self.identity().ok_or(MutationError::NotSignedIn)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.lock();
        let _ = tx.send(guard.state.clone());
        guard.subscribers.push(tx);
        rx
    }

    /// Applies `event`. Returns the new state, or `None` when the event is not valid
    /// in the current status and the state was left untouched.
    pub fn dispatch(&self, event: SessionEvent) -> Option<SessionState> {
        let mut guard = self.lock();
        let next = reduce(&guard.state, &event);
        if next.revision == guard.state.revision {
            warn!(
                status = ?guard.state.status,
                event = event_name(&event),
                "session: ignored event"
            );
            return None;
        }

        debug!(
            revision = next.revision,
            status = ?next.status,
            signed_in = next.identity.is_some(),
            "session: applied event"
        );
        guard.state = next.clone();
        guard
            .subscribers
            .retain(|subscriber| subscriber.send(next.clone()).is_ok());
        Some(next)
    }

    pub fn try_begin(&self, kind: MutationKind) -> Result<(), MutationError> {
        self.dispatch(SessionEvent::MutationStart(kind))
            .map(|_| ())
            .ok_or(MutationError::Busy)
    }

    pub fn acknowledge(&self) -> Option<SessionState> {
        self.dispatch(SessionEvent::Acknowledge)
    }
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::MutationStart(_) => "mutation_start",
        SessionEvent::MutationSuccess(_) => "mutation_success",
        SessionEvent::MutationFailure(_) => "mutation_failure",
        SessionEvent::Acknowledge => "acknowledge",
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
