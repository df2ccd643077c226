/// Shared error type used across the tool-call authorization gateway.
///
/// Mirrors the taxonomy in the authorize endpoint's error handling design:
/// policy outcomes (denied, expired, binding mismatch) are *decisions*, not
/// errors, and never appear here — this enum only carries infrastructure and
/// request-shape faults.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("config: {0}")]
    Config(String),

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
