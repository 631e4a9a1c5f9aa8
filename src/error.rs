use std::fmt;
use std::io;

use reqwest::StatusCode;
use thiserror::Error;

use crate::digest::Digest;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Maximum length of a response-body excerpt carried inside an error.
const SNIPPET_LIMIT: usize = 240;

/// Sub-step of a blob upload, used to pinpoint where a transfer died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Head,
    OpenSession,
    Chunk { offset: u64 },
    Finalize,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPhase::Head => write!(f, "head"),
            UploadPhase::OpenSession => write!(f, "open-session"),
            UploadPhase::Chunk { offset } => write!(f, "chunk@{offset}"),
            UploadPhase::Finalize => write!(f, "finalize"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid image tar: {0}")]
    InvalidImageTar(String),

    #[error("failed to read image tar")]
    TarReadError(#[source] io::Error),

    #[error("registry unreachable")]
    RegistryUnreachable(#[source] reqwest::Error),

    #[error("registry returned HTTP {status}: {snippet}")]
    RegistryProtocolError { status: StatusCode, snippet: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("digest mismatch: expected {expected}, got {got}")]
    DigestMismatch { expected: String, got: String },

    #[error("registry is configured without delete support")]
    DeletionDisabled,

    #[error("image tar carries no original repository tags")]
    NoOriginalTag,

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("upload of blob {digest} failed during {phase}")]
    UploadFailed {
        digest: Digest,
        phase: UploadPhase,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("request timed out during {0}")]
    Timeout(String),

    #[error("push cancelled")]
    Cancelled,

    #[error("{} of {} manifest tags failed to publish", .failed.len(), .failed.len() + .succeeded.len())]
    MultiTagPush {
        succeeded: Vec<(String, Digest)>,
        failed: Vec<(String, RegistryError)>,
    },
}

impl RegistryError {
    pub(crate) fn protocol(status: StatusCode, body: &str) -> Self {
        RegistryError::RegistryProtocolError {
            status,
            snippet: snippet(body),
        }
    }

    pub(crate) fn upload(digest: &Digest, phase: UploadPhase, source: RegistryError) -> Self {
        RegistryError::UploadFailed {
            digest: digest.clone(),
            phase,
            source: Box::new(source),
        }
    }

    /// Whether a retry at the caller's level could plausibly succeed.
    /// Protocol rejections and client-side validation never are.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::RegistryUnreachable(_) | RegistryError::Timeout(_) => true,
            RegistryError::RegistryProtocolError { status, .. } => {
                crate::retry::is_retryable_status(*status)
            }
            RegistryError::UploadFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Map a transport-level reqwest failure onto the error taxonomy.
pub(crate) fn transport_error(operation: &str, err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        RegistryError::Timeout(operation.to_string())
    } else {
        RegistryError::RegistryUnreachable(err)
    }
}

/// Truncate a response body to something fit for an error message.
pub(crate) fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= SNIPPET_LIMIT {
        trimmed.to_string()
    } else {
        let mut end = SNIPPET_LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}
