//! Failure classification for routed API calls.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The pool holds no credentials at all.
    #[error("no API credentials available")]
    NoCredentialsAvailable,

    /// Every allowed attempt failed.
    #[error("all API credentials exhausted")]
    AllCredentialsExhausted,

    #[error("YouTube API request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout")]
    Timeout,
}

impl RouterError {
    /// The text recorded against a credential when an attempt fails this way.
    pub fn reason(&self) -> String {
        match self {
            RouterError::Http { message, .. } => message.clone(),
            RouterError::Network(_) => "Network error".to_string(),
            RouterError::Timeout => "Request timeout".to_string(),
            other => other.to_string(),
        }
    }

    /// How long to wait before retrying after this failure.
    pub(crate) fn backoff(&self, http: Duration, network: Duration) -> Duration {
        match self {
            RouterError::Network(_) => network,
            _ => http,
        }
    }

    /// Classifies a transport failure. The URL is stripped since its query
    /// string carries the credential.
    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RouterError::Timeout
        } else {
            RouterError::Network(error.without_url().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reasons() {
        let http = RouterError::Http {
            status: 403,
            message: "quota exceeded".to_string(),
        };
        assert_eq!(http.reason(), "quota exceeded");
        assert_eq!(RouterError::Network("dns".into()).reason(), "Network error");
        assert_eq!(RouterError::Timeout.reason(), "Request timeout");
    }

    #[test]
    fn network_failures_back_off_longer() {
        let http = Duration::from_millis(500);
        let network = Duration::from_millis(1000);
        assert_eq!(RouterError::Timeout.backoff(http, network), http);
        assert_eq!(RouterError::Network(String::new()).backoff(http, network), network);
    }
}
