use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gh_client::{CommitPayload, GithubClient, GithubError};
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorInfo {
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    /// `None` when GitHub could not link the commit to an account.
    pub author: Option<AuthorInfo>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<CommitPayload> for CommitInfo {
    fn from(payload: CommitPayload) -> Self {
        let timestamp = payload.timestamp();
        let author = payload.author.and_then(|author| {
            author.id.map(|github_id| AuthorInfo {
                github_id,
                login: author.login,
                avatar_url: author.avatar_url,
                html_url: author.html_url,
            })
        });
        Self {
            sha: payload.sha,
            author,
            timestamp,
        }
    }
}

#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Full commit history touching `path`, newest first.
    async fn list_commits(&self, path: &str) -> Result<Vec<CommitInfo>, GithubError>;
}

pub struct GithubCommitSource {
    client: GithubClient,
    owner: String,
    repo: String,
    token: Option<String>,
    per_page: u32,
}

impl GithubCommitSource {
    pub fn new(
        client: GithubClient,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
        per_page: u32,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            token,
            per_page,
        }
    }
}

#[async_trait]
impl CommitSource for GithubCommitSource {
    #[instrument(skip(self), fields(owner = %self.owner, repo = %self.repo))]
    async fn list_commits(&self, path: &str) -> Result<Vec<CommitInfo>, GithubError> {
        let mut commits = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self
                .client
                .commits_page(
                    self.token.as_deref(),
                    &self.owner,
                    &self.repo,
                    path,
                    page,
                    self.per_page,
                )
                .await?;
            let has_next = batch.has_next;
            if batch.commits.is_empty() {
                break;
            }
            commits.extend(batch.commits.into_iter().map(CommitInfo::from));
            if !has_next {
                break;
            }
            page += 1;
        }
        debug!(path, pages = page, commits = commits.len(), "fetched commit history");
        Ok(commits)
    }
}
