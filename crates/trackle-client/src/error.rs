/// Errors surfaced by the remote tracking client.
/// Retry handling lives in the transport; by the time one of these reaches
/// a caller the retry budget has been spent.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    // Configuration: fatal, surfaced before any network activity
    #[error("provider API token is not configured (set TRACKLE_TOKEN)")]
    MissingToken,
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Transport: already retried per policy
    #[error("network error talking to provider: {0}")]
    Network(String),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // Provider-level failure (top-level result code)
    #[error("provider API error code {code}: {detail}")]
    Provider { code: i64, detail: String },

    #[error("could not parse provider response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Network(_) => "network",
            Self::Http { .. } => "http",
            Self::Provider { .. } => "provider",
            Self::Malformed(_) => "malformed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings() {
        assert_eq!(ClientError::MissingToken.kind(), "missing_token");
        assert_eq!(
            ClientError::Http { status: 404, body: String::new() }.kind(),
            "http"
        );
        assert_eq!(
            ClientError::Provider { code: 401, detail: "bad token".into() }.kind(),
            "provider"
        );
    }
}
