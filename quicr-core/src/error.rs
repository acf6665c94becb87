//! Error taxonomy, `spec.md` §7.
//!
//! Four kinds of failure, each with its own policy: transient errors are
//! reported without mutating cache state, protocol errors close the
//! offending stream only, peer-initiated errors propagate a close reason
//! through every stream on the connection, and fatal errors close the
//! connection while the process keeps running.

/// Errors raised by the fragment cache (C2) and reassembly (C3).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("out of memory inserting fragment")]
    OutOfMemory,

    #[error("cache index corruption: {0}")]
    Corrupt(&'static str),
}

/// Per-request/per-stream errors, surfaced over the control stream.
///
/// Mirrors the teacher's `serve::ServeError` shape: one flat enum with a
/// `code()` method mapping variants onto the wire error codes used to close
/// a stream (`spec.md` §7, "Policy: close the stream with code PROTOCOL").
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServeError {
    #[error("done")]
    Done,

    #[error("cancelled")]
    Cancel,

    #[error("closed, code={0}")]
    Closed(u64),

    #[error("not found")]
    NotFound,

    #[error("duplicate subscription")]
    Duplicate,

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServeError {
    pub const CODE_PROTOCOL: u64 = 0x1;
    pub const CODE_INTERNAL: u64 = 0x2;
    pub const CODE_NOT_FOUND: u64 = 0x3;

    pub fn code(&self) -> u64 {
        match self {
            Self::Done => 0,
            Self::Cancel => 0,
            Self::Closed(code) => *code,
            Self::NotFound => Self::CODE_NOT_FOUND,
            Self::Duplicate => Self::CODE_PROTOCOL,
            Self::Protocol(_) => Self::CODE_PROTOCOL,
            Self::Internal(_) => Self::CODE_INTERNAL,
        }
    }
}

impl From<CacheError> for ServeError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::OutOfMemory => ServeError::Internal("out of memory".into()),
            CacheError::Corrupt(what) => ServeError::Internal(format!("corrupt cache: {what}")),
        }
    }
}

/// Why a connection or stream closed, propagated from a peer-initiated event
/// (`spec.md` §7, "Peer-initiated").
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReason {
    pub error_code: u64,
    pub reason: String,
}

impl CloseReason {
    pub fn new(error_code: u64, reason: impl Into<String>) -> Self {
        Self {
            error_code,
            reason: reason.into(),
        }
    }
}
