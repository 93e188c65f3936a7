use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DiscussionError, DtoIssue};

/// Structural checks that serde alone cannot express.
pub trait Validate {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>);

    fn validate(&self) -> Result<(), DiscussionError> {
        let mut issues = Vec::new();
        self.validate_into("", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(DiscussionError::InvalidDto(issues))
        }
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn check_id(path: &str, field: &str, value: &str, issues: &mut Vec<DtoIssue>) {
    if value.trim().is_empty() {
        issues.push(DtoIssue {
            path: join(path, field),
            message: "must not be empty".to_string(),
        });
    }
}

fn check_url(path: &str, field: &str, value: &str, issues: &mut Vec<DtoIssue>) {
    let valid = Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false);
    if !valid {
        issues.push(DtoIssue {
            path: join(path, field),
            message: format!("invalid url {value:?}"),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionAuthor {
    pub login: String,
    pub avatar_url: String,
    pub url: String,
}

impl Validate for DiscussionAuthor {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        check_url(path, "avatarUrl", &self.avatar_url, issues);
        check_url(path, "url", &self.url, issues);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionReply {
    pub id: String,
    pub body: String,
    #[serde(rename = "bodyHTML")]
    pub body_html: String,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub author: Option<DiscussionAuthor>,
}

impl Validate for DiscussionReply {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        check_id(path, "id", &self.id, issues);
        check_url(path, "url", &self.url, issues);
        if let Some(author) = &self.author {
            author.validate_into(&join(path, "author"), issues);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliesConnection {
    pub total_count: u64,
    pub page_info: PageInfo,
    pub nodes: Vec<DiscussionReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionComment {
    pub id: String,
    pub body: String,
    #[serde(rename = "bodyHTML")]
    pub body_html: String,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_answer: Option<bool>,
    pub author: Option<DiscussionAuthor>,
    /// Absent on freshly created comments.
    #[serde(default)]
    pub replies: RepliesConnection,
}

impl Validate for DiscussionComment {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        check_id(path, "id", &self.id, issues);
        check_url(path, "url", &self.url, issues);
        if let Some(author) = &self.author {
            author.validate_into(&join(path, "author"), issues);
        }
        for (idx, reply) in self.replies.nodes.iter().enumerate() {
            reply.validate_into(&join(path, &format!("replies.nodes[{idx}]")), issues);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionSummary {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl Validate for DiscussionSummary {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        check_id(path, "id", &self.id, issues);
        check_url(path, "url", &self.url, issues);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentsCollection {
    pub total_count: u64,
    pub page_info: PageInfo,
    pub nodes: Vec<DiscussionComment>,
}

impl CommentsCollection {
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Validate for CommentsCollection {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        if (self.nodes.len() as u64) > self.total_count {
            issues.push(DtoIssue {
                path: join(path, "totalCount"),
                message: "smaller than the number of returned nodes".to_string(),
            });
        }
        for (idx, comment) in self.nodes.iter().enumerate() {
            comment.validate_into(&join(path, &format!("nodes[{idx}]")), issues);
        }
    }
}

/// Body of `GET /discussions/:doc_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionResponse {
    pub doc_id: String,
    pub discussion: Option<DiscussionSummary>,
    pub comments: CommentsCollection,
}

impl DiscussionResponse {
    pub fn empty(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            discussion: None,
            comments: CommentsCollection::empty(),
        }
    }
}

impl Validate for DiscussionResponse {
    fn validate_into(&self, path: &str, issues: &mut Vec<DtoIssue>) {
        check_id(path, "docId", &self.doc_id, issues);
        if let Some(discussion) = &self.discussion {
            discussion.validate_into(&join(path, "discussion"), issues);
        }
        self.comments.validate_into(&join(path, "comments"), issues);
    }
}
