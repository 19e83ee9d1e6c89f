use thiserror::Error;
use uuid::Uuid;

/// Failures of the remote store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("row not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failures of a single translation oracle call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a chat session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fatal to join.
    #[error("failed to resolve group '{name}': {source}")]
    GroupResolution {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Logged, never fatal.
    #[error("failed to write presence: {0}")]
    PresenceWrite(#[source] StoreError),

    /// Fatal to the send; nothing was appended locally.
    #[error("failed to write message: {0}")]
    MessageWrite(#[source] StoreError),

    /// One target language failed; the rest of the fan-out carries on.
    #[error("translation to '{target}' failed: {source}")]
    OracleCall {
        target: String,
        #[source]
        source: OracleError,
    },

    #[error("not joined to a group")]
    NotJoined,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
