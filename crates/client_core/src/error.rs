use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("another profile operation is still pending")]
    Busy,
    #[error("not signed in")]
    NotSignedIn,
    #[error("timeout")]
    Timeout,
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Application {
        status: Option<u16>,
        message: String,
    },
    #[error("invalid response from server: {0}")]
    Decode(String),
}

impl MutationError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            status: None,
            message: message.into(),
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for MutationError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout;
        }
        if value.is_decode() {
            return Self::Decode(value.to_string());
        }
        Self::Transport(value.to_string())
    }
}
