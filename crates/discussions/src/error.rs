use gh_client::GithubError;
use serde::Serialize;
use thiserror::Error;

/// One failed check against the discussion response contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtoIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DiscussionError {
    #[error(transparent)]
    Github(#[from] GithubError),
    #[error("discussion payload does not match the response contract")]
    InvalidDto(Vec<DtoIssue>),
    #[error("{0}")]
    CreationFailed(String),
    #[error("creation lock unavailable: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, DiscussionError>;
