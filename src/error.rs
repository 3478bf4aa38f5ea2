use thiserror::Error;

/// Errors surfaced to the host. Engine status codes are *not* errors - they are passed through
///  as plain integers.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The engine refused to allocate a session, or the session's context values could not be
    ///  copied.
    #[error("fail to create session: {0}")]
    Creation(String),

    /// The session's engine was already released.
    #[error("session was already released")]
    InvalidHandle,

    /// The session is in the middle of an operation further up the call stack, i.e. its own
    ///  output dispatch called back into it.
    #[error("session is busy: re-entered from its own output dispatch")]
    SessionBusy,

    /// 1-based argument position, as the host counts them
    #[error("bad argument #{position}: {expected} expected")]
    BadArgument { position: usize, expected: &'static str },

    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type BindingResult<T> = Result<T, BindingError>;

impl BindingError {
    pub fn bad_argument(position: usize, expected: &'static str) -> BindingError {
        BindingError::BadArgument { position, expected }
    }

    /// The message that is handed to the host as the second half of a `(nil, message)` pair
    pub fn host_message(&self) -> String {
        format!("error: {}", self)
    }
}
