//! Client error types

/// Result type for collaborator calls
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{service} api error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn api(service: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            service,
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse(reason.into())
    }

    /// Failures a later delivery could plausibly get past without anyone
    /// changing configuration.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::RateLimited { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::AuthFailed(_)
            | ClientError::NotFound(_)
            | ClientError::InvalidResponse(_) => false,
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(
        service: &'static str,
        status: u16,
        body: String,
        retry_after_ms: Option<u64>,
    ) -> Self {
        match status {
            401 | 403 => ClientError::AuthFailed(body),
            404 => ClientError::NotFound(body),
            429 => ClientError::RateLimited {
                retry_after_ms: retry_after_ms.unwrap_or(60_000),
            },
            _ => ClientError::api(service, status, body),
        }
    }
}

/// `Retry-After` in milliseconds, when the server sent a seconds value.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}
