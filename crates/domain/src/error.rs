/// Shared error type used across all BotMaker crates.
///
/// Variants follow the HTTP taxonomy the API layers map to: validation → 400,
/// not-found → 404, conflict → 409, unauthorized → 401, forbidden → 403,
/// upstream/internal → 500. Proxy-specific failures (bad gateway / timeout)
/// carry their own variants so the data plane can answer 502/504.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A collaborator (container runtime, keyring, database) failed in a way
    /// we could not compensate. The message is already scrubbed of secrets.
    #[error("upstream: {0}")]
    Upstream(String),

    /// The LLM upstream could not be reached.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// The LLM upstream did not answer within the request budget.
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("port space exhausted from {0}")]
    PortExhausted(u16),

    #[error("database: {0}")]
    Database(String),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
