use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    NotFound(String),
    #[error("GitHub request to {endpoint} failed with status {status}")]
    Upstream {
        status: u16,
        endpoint: String,
        body: String,
    },
    #[error("{message}")]
    Graphql {
        message: String,
        errors: serde_json::Value,
    },
    #[error("{0}")]
    Validation(String),
    #[error("GitHub API rate limit reached ({endpoint}). Resets at {}.", format_reset(.reset))]
    RateLimited {
        endpoint: String,
        reset: Option<DateTime<Utc>>,
    },
    #[error("GitHub request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("GitHub request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
}

impl GithubError {
    pub fn missing_token(context: &str) -> Self {
        Self::Configuration(format!("GitHub token missing for {context}"))
    }

    /// Diagnostic payload surfaced to API callers.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Upstream { status, body, .. } => Some(serde_json::json!({
                "status": status,
                "body": body,
            })),
            Self::Graphql { errors, .. } => Some(errors.clone()),
            Self::RateLimited { reset, .. } => Some(serde_json::json!({
                "reset": reset.as_ref().map(iso8601),
            })),
            _ => None,
        }
    }

    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub fn iso8601(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_reset(reset: &Option<DateTime<Utc>>) -> String {
    reset
        .as_ref()
        .map(iso8601)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_uses_iso8601_reset() {
        let err = GithubError::RateLimited {
            endpoint: "commits app/docs/a.md".into(),
            reset: DateTime::from_timestamp(1_700_000_000, 0),
        };
        let message = err.to_string();
        assert!(message.contains("2023-11-14T22:13:20.000Z"), "{message}");
        assert!(!message.contains("1700000000"));
    }

    #[test]
    fn rate_limit_without_reset_says_unknown() {
        let err = GithubError::RateLimited {
            endpoint: "graphql".into(),
            reset: None,
        };
        assert!(err.to_string().ends_with("Resets at unknown."));
    }
}
