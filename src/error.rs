//! Error types for the signing pipeline.
//!
//! One crate-wide [`Error`] covers both reading the source document and the
//! signing taxonomy (reservation sizing, revocation retrieval, the external
//! signing capability, timestamping and cleanup). [`PipelineError`] pairs an
//! error with the terminal state the orchestrator stopped in.

use std::path::PathBuf;

use crate::signatures::PipelineState;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, reserving, signing or finalizing.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// The signing request violates its own invariants (empty chain, unreadable certificate)
    #[error("Invalid signing request: {0}")]
    InvalidRequest(String),

    /// The assembled signature does not fit in the reserved slot
    #[error("Signature structure needs {required} bytes but only {capacity} were reserved")]
    ReservationSize {
        /// Encoded length of the signature structure
        required: usize,
        /// Capacity reserved in the intermediate document
        capacity: usize,
    },

    /// Revocation evidence could not be retrieved
    #[error("Revocation fetch failed: {0}")]
    RevocationFetch(String),

    /// The external signing capability failed or refused the request
    #[error("Signing capability error: {0}")]
    SigningCapability(String),

    /// Digest or signature algorithm not supported by a collaborator
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The timestamp authority was unreachable, rejected the request or returned a bad token
    #[error("Timestamp error: {0}")]
    Timestamp(String),

    /// Transport failure talking to a remote service
    #[error("Network error: {0}")]
    Network(String),

    /// DER encoding or decoding failure
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cancelled by the caller
    #[error("Signing cancelled")]
    Cancelled,

    /// The intermediate artifact could not be removed
    #[error("Failed to remove intermediate artifact {}: {source}", path.display())]
    Cleanup {
        /// Path of the artifact that was left behind
        path: PathBuf,
        /// Underlying IO failure
        source: std::io::Error,
    },
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only transport failures qualify; a rejection by the remote party is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Failure of a signing pipeline, tagged with the terminal state it reached.
#[derive(Debug, thiserror::Error)]
#[error("signing pipeline stopped in state {state}: {source}")]
pub struct PipelineError {
    /// Terminal state (`ReservationFailed` or `SigningFailed`)
    pub state: PipelineState,
    /// The error that ended the pipeline
    #[source]
    pub source: Error,
}

impl PipelineError {
    /// Create a pipeline error for the given terminal state.
    pub fn new(state: PipelineState, source: Error) -> Self {
        Self { state, source }
    }
}
