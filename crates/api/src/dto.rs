use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use db::{DocContributorRow, DocRow};
use discussions::{CommentsCollection, DiscussionSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionQuery {
    pub cursor: Option<String>,
    pub page_size: Option<String>,
    pub reply_page_size: Option<String>,
}

/// Lenient page-size parsing: anything that is not a positive integer means
/// "use the default".
pub fn parse_page_size(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|size| *size > 0)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentBody {
    pub body: Option<String>,
    pub doc_path: Option<String>,
    pub doc_title: Option<String>,
    pub doc_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplyBody {
    pub body: Option<String>,
    pub comment_id: Option<String>,
}

/// Body of a successful comment or reply submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse<T> {
    pub doc_id: String,
    pub discussion: Option<DiscussionSummary>,
    pub comments: CommentsCollection,
    pub created: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

/// Maps a docs-relative path (`ai/intro.mdx`, `\\ai\\intro.mdx`) to the
/// repository path stored in the ledger. Paths already under `docs_dir`
/// pass through.
pub fn normalize_doc_path(docs_dir: &str, raw: &str) -> String {
    let cleaned = raw.trim().replace('\\', "/");
    let cleaned = cleaned.trim_start_matches('/');
    let docs_dir = docs_dir.replace('\\', "/");
    let docs_dir = docs_dir.trim_matches('/');
    if docs_dir.is_empty() || cleaned.starts_with(&format!("{docs_dir}/")) {
        cleaned.to_string()
    } else {
        format!("{docs_dir}/{cleaned}")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorDto {
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub contributions: i32,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

impl From<DocContributorRow> for ContributorDto {
    fn from(row: DocContributorRow) -> Self {
        Self {
            github_id: row.github_id,
            login: row.login,
            avatar_url: row.avatar_url,
            html_url: row.html_url,
            contributions: row.contributions,
            last_contributed_at: row.last_contributed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocContributorsDto {
    pub doc_id: String,
    pub path: Option<String>,
    pub title: Option<String>,
    pub paths: Vec<String>,
    pub contributor_stats: BTreeMap<String, i64>,
    pub contributors: Vec<ContributorDto>,
    pub updated_at: DateTime<Utc>,
}

impl DocContributorsDto {
    pub fn new(
        doc: DocRow,
        paths: Vec<String>,
        rows: Vec<DocContributorRow>,
    ) -> db::errors::Result<Self> {
        Ok(Self {
            contributor_stats: doc.stats()?,
            doc_id: doc.id,
            path: doc.path_current,
            title: doc.title,
            paths,
            contributors: rows.into_iter().map(ContributorDto::from).collect(),
            updated_at: doc.updated_at,
        })
    }
}
