use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No object at the given path, or topic_id unknown.
    NotFound,
    /// ETag mismatch on optimistic write. The fresh etag is carried in `context`.
    Conflict,
    /// Lock acquisition refused (non-waiting mode, or waiter exhausted `wait_ttl`).
    LockHeld,
    /// Release/force-unlock supplied a lock_id that doesn't match the holder.
    LockMismatch,
    /// Lock acquisition waited past `wait_ttl`.
    Timeout,
    /// JSON could not be parsed, or lacked a required field.
    SchemaError,
    /// Underlying object store failure.
    Io,
    /// Caller passed something the store can't act on.
    InvalidArgument,
    /// Internal invariant violated, a bug rather than a caller error.
    Internal,
    /// Parse of an unsupported document format (surfaced from an external collaborator).
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    /// Present only for `Conflict`: the etag the caller should retry with.
    pub fresh_etag: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into(), fresh_etag: None }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context)
    }

    pub fn conflict(context: impl Into<String>, fresh_etag: impl Into<String>) -> Self {
        Error { kind: ErrorKind::Conflict, context: context.into(), fresh_etag: Some(fresh_etag.into()) }
    }

    pub fn lock_held(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::LockHeld, context)
    }

    pub fn lock_mismatch(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::LockMismatch, context)
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Timeout, context)
    }

    pub fn schema(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::SchemaError, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::new(ErrorKind::NotFound, err.to_string()),
            _ => Error::new(ErrorKind::Io, err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::SchemaError, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
