use crate::replication::VectorClock;
use thiserror::Error;

/// Error kinds surfaced by the replica engine and the client library.
///
/// `ContextUnsatisfied` and `NotFound` are distinct so callers can tell
/// "try again" apart from "really missing". `NotFound` and
/// `AlreadyExists` carry a causal context so a session does not lose its
/// history on a failed request.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// The replica has not yet seen at least one event the client has
    /// witnessed. Retriable.
    #[error("cannot service client: replica is behind the supplied causal context")]
    ContextUnsatisfied,

    /// Read of an absent key with a satisfied context. The client's
    /// context is preserved.
    #[error("read {key:?}: does not exist")]
    NotFound { key: String, context: VectorClock },

    /// Write issued in no-rewrite mode against an existing key. Carries
    /// the existing column's payload and context.
    #[error("write {key:?}: already exists")]
    AlreadyExists {
        key: String,
        value: String,
        context: VectorClock,
    },

    /// Malformed payload.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A peer was unreachable or replied outside the protocol.
    #[error("transport: {0}")]
    Transport(String),
}

impl KvError {
    /// HTTP status the error maps to on the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            KvError::ContextUnsatisfied => 503,
            KvError::NotFound { .. } => 404,
            KvError::AlreadyExists { .. } => 400,
            KvError::BadRequest(_) => 400,
            KvError::Transport(_) => 500,
        }
    }

    /// True for errors a client may simply retry later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, KvError::ContextUnsatisfied | KvError::Transport(_))
    }
}
