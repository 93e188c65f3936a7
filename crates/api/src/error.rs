use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use discussions::{DiscussionError, DtoIssue};
use gh_client::GithubError;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Github {
        status: StatusCode,
        message: String,
        details: Option<Value>,
    },
    InvalidDto(Vec<DtoIssue>),
    Database(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Github { status, .. } => *status,
            ApiError::InvalidDto(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Github { .. } => "GITHUB_ERROR",
            ApiError::InvalidDto(_) => "INVALID_RESPONSE_DTO",
            ApiError::Database(_) | ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub fn github_status(err: &GithubError) -> StatusCode {
    match err {
        GithubError::NotFound(_) => StatusCode::NOT_FOUND,
        GithubError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GithubError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GithubError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl From<GithubError> for ApiError {
    fn from(err: GithubError) -> Self {
        Self::Github {
            status: github_status(&err),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

impl From<DiscussionError> for ApiError {
    fn from(err: DiscussionError) -> Self {
        match err {
            DiscussionError::Github(err) => err.into(),
            DiscussionError::InvalidDto(issues) => Self::InvalidDto(issues),
            DiscussionError::CreationFailed(message) => Self::Github {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message,
                details: None,
            },
            DiscussionError::Lock(message) => Self::Internal(message),
        }
    }
}

impl From<db::DbError> for ApiError {
    fn from(err: db::DbError) -> Self {
        Self::Database(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, details) = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) | ApiError::NotFound(msg) => {
                (msg, None)
            }
            ApiError::Github {
                message, details, ..
            } => (message, details),
            ApiError::InvalidDto(issues) => (
                "discussion data does not match the response contract".to_string(),
                serde_json::to_value(issues).ok(),
            ),
            ApiError::Database(msg) | ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (msg, None)
            }
        };
        let body = Json(ErrorBody {
            code,
            message,
            details,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn github_errors_map_to_gateway_statuses() {
        let cases = [
            (GithubError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (
                GithubError::missing_token("ctx"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                GithubError::RateLimited {
                    endpoint: "graphql".into(),
                    reset: DateTime::from_timestamp(1_700_000_000, 0),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                GithubError::Timeout {
                    endpoint: "graphql".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                GithubError::Upstream {
                    status: 401,
                    endpoint: "graphql".into(),
                    body: "bad credentials".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), "GITHUB_ERROR");
        }
    }

    #[test]
    fn invalid_dto_is_an_internal_contract_error() {
        let api: ApiError = DiscussionError::InvalidDto(vec![DtoIssue {
            path: "discussion.url".into(),
            message: "not an absolute http(s) URL".into(),
        }])
        .into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code(), "INVALID_RESPONSE_DTO");
    }
}
