use std::sync::Arc;

use common::config::DiscussionsConfig;
use gh_client::client::ensure_token;
use gh_client::{GithubClient, GithubError, RequestKind};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::dto::{
    CommentsCollection, DiscussionComment, DiscussionReply, DiscussionResponse,
    DiscussionSummary, Validate,
};
use crate::error::{DiscussionError, Result};
use crate::lock::CreationLock;
use crate::metadata::{MetadataCache, MetadataResolver, RepositoryMetadata};
use crate::queries::{
    ADD_DISCUSSION_COMMENT, ADD_DISCUSSION_COMMENT_MUTATION, ADD_DISCUSSION_REPLY,
    ADD_DISCUSSION_REPLY_MUTATION, CREATE_DISCUSSION, CREATE_DISCUSSION_MUTATION,
    DISCUSSION_WITH_COMMENTS, DISCUSSION_WITH_COMMENTS_QUERY, SEARCH_DISCUSSION,
    SEARCH_DISCUSSION_QUERY,
};

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub comment_cursor: Option<String>,
    pub comment_page_size: Option<u32>,
    pub reply_page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscussionThread {
    pub discussion: Option<DiscussionSummary>,
    pub comments: Option<CommentsCollection>,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureDiscussion {
    pub doc_id: String,
    pub doc_path: Option<String>,
    pub doc_title: Option<String>,
    pub doc_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddComment {
    pub discussion_id: String,
    pub body: String,
    /// The commenting user's OAuth token.
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AddReply {
    pub comment_id: String,
    pub body: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(default)]
    nodes: Vec<SearchHit>,
}

/// Non-discussion search nodes come back as `{}`, so every field is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    id: Option<String>,
    number: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    repository: Option<SearchRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRepository {
    name_with_owner: String,
}

impl SearchHit {
    fn into_summary(self) -> Option<DiscussionSummary> {
        Some(DiscussionSummary {
            id: self.id?,
            number: self.number?,
            title: self.title?,
            url: self.url?,
            created_at: self.created_at?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NodeData {
    node: Option<DiscussionNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionNode {
    id: String,
    number: u64,
    title: String,
    url: String,
    created_at: chrono::DateTime<chrono::Utc>,
    comments: CommentsCollection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    create_discussion: Option<CreatePayload>,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    discussion: Option<DiscussionSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentData {
    add_discussion_comment: Option<CommentPayload<DiscussionComment>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddReplyData {
    add_discussion_reply: Option<CommentPayload<DiscussionReply>>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload<T> {
    comment: Option<T>,
}

/// Body for a lazily created discussion. The leading HTML comment carries
/// the docId so the thread stays attributable if its title is edited.
pub fn build_discussion_body(request: &EnsureDiscussion) -> String {
    let mut lines = vec![
        format!("<!-- docId:{} -->", request.doc_id),
        "This discussion is automatically created for document updates.".to_string(),
    ];
    if let Some(title) = non_blank(&request.doc_title) {
        lines.push(format!("- **Title:** {title}"));
    }
    if let Some(path) = non_blank(&request.doc_path) {
        lines.push(format!("- **Path:** `{path}`"));
    }
    if let Some(url) = non_blank(&request.doc_url) {
        lines.push(format!("- **URL:** {url}"));
    }
    lines.push(String::new());
    lines.push(
        "Feel free to discuss the content here. Notifications are handled by GitHub.".to_string(),
    );
    lines.join("\n")
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct DiscussionService {
    client: GithubClient,
    config: DiscussionsConfig,
    server_token: Option<String>,
    metadata: MetadataResolver,
    lock: Arc<dyn CreationLock>,
}

impl DiscussionService {
    pub fn new(
        client: GithubClient,
        config: DiscussionsConfig,
        server_token: Option<String>,
        cache: Arc<MetadataCache>,
        lock: Arc<dyn CreationLock>,
    ) -> Self {
        let metadata = MetadataResolver::new(client.clone(), config.clone(), cache);
        Self {
            client,
            config,
            server_token,
            metadata,
            lock,
        }
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        self.metadata.cache()
    }

    fn server_token(&self, context: &str) -> Result<&str> {
        Ok(ensure_token(self.server_token.as_deref(), context)?)
    }

    fn name_with_owner(&self) -> String {
        format!("{}/{}", self.config.owner, self.config.repo)
    }

    pub async fn resolve_metadata(&self) -> Result<Arc<RepositoryMetadata>> {
        let token = self.server_token("resolveRepositoryMetadata")?;
        self.metadata.resolve(token).await
    }

    /// Title search scoped to the configured repository. Hits from other
    /// repositories are dropped and an exact title match wins over a substring hit.
    #[instrument(skip(self))]
    pub async fn search_by_doc_id(&self, doc_id: &str) -> Result<Option<DiscussionSummary>> {
        let token = self.server_token("searchDiscussionByDocId")?;
        let target = self.name_with_owner();
        let term = doc_id.replace('"', "");
        let query = format!("repo:{target} in:title \"{term}\"");

        let data: SearchData = self
            .client
            .graphql(
                token,
                SEARCH_DISCUSSION,
                SEARCH_DISCUSSION_QUERY,
                json!({ "query": query }),
                RequestKind::Read,
            )
            .await?;

        let mut hits: Vec<DiscussionSummary> = Vec::new();
        for hit in data.search.nodes {
            let same_repo = hit
                .repository
                .as_ref()
                .map(|r| r.name_with_owner.eq_ignore_ascii_case(&target))
                .unwrap_or(false);
            if !same_repo {
                if hit.id.is_some() {
                    warn!(doc_id, "ignoring search hit from another repository");
                }
                continue;
            }
            if let Some(summary) = hit.into_summary() {
                hits.push(summary);
            }
        }

        let exact = hits.iter().position(|hit| hit.title == doc_id);
        Ok(match exact {
            Some(idx) => Some(hits.swap_remove(idx)),
            None => hits.into_iter().next(),
        })
    }

    #[instrument(skip(self, options))]
    pub async fn fetch_with_comments(
        &self,
        discussion_id: &str,
        options: FetchOptions,
    ) -> Result<DiscussionThread> {
        let token = self.server_token("fetchDiscussionWithComments")?;
        let comment_page_size = options
            .comment_page_size
            .unwrap_or(self.config.comment_page_size)
            .clamp(1, MAX_PAGE_SIZE);
        let reply_page_size = options
            .reply_page_size
            .unwrap_or(self.config.reply_page_size)
            .clamp(1, MAX_PAGE_SIZE);

        let result: std::result::Result<NodeData, GithubError> = self
            .client
            .graphql(
                token,
                DISCUSSION_WITH_COMMENTS,
                DISCUSSION_WITH_COMMENTS_QUERY,
                json!({
                    "id": discussion_id,
                    "commentPageSize": comment_page_size,
                    "commentCursor": options.comment_cursor,
                    "replyPageSize": reply_page_size,
                }),
                RequestKind::Read,
            )
            .await;

        let node = match result {
            Ok(data) => data.node,
            Err(GithubError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };

        Ok(match node {
            None => DiscussionThread::default(),
            Some(node) => DiscussionThread {
                discussion: Some(DiscussionSummary {
                    id: node.id,
                    number: node.number,
                    title: node.title,
                    url: node.url,
                    created_at: node.created_at,
                }),
                comments: Some(node.comments),
            },
        })
    }

    /// Creates a discussion titled exactly `doc_id`. `None` when GitHub
    /// accepted the mutation but returned no discussion.
    #[instrument(skip(self, body))]
    pub async fn create_for_doc(&self, doc_id: &str, body: &str) -> Result<Option<DiscussionSummary>> {
        let token = self.server_token("createDiscussionForDocId")?;
        let metadata = self.metadata.resolve(token).await?;

        let data: CreateData = self
            .client
            .graphql(
                token,
                CREATE_DISCUSSION,
                CREATE_DISCUSSION_MUTATION,
                json!({
                    "repositoryId": metadata.repository_id,
                    "categoryId": metadata.category_id,
                    "title": doc_id,
                    "body": body,
                }),
                RequestKind::Mutation,
            )
            .await?;

        Ok(data.create_discussion.and_then(|payload| payload.discussion))
    }

    /// Returns the discussion for the doc, creating it when none exists.
    /// Search and create run under the creation lock for the docId.
    #[instrument(skip(self, request), fields(doc_id = %request.doc_id))]
    pub async fn ensure_for_doc(&self, request: EnsureDiscussion) -> Result<DiscussionSummary> {
        self.server_token("ensureDiscussionForDoc")?;
        let guard = self.lock.acquire(&request.doc_id).await?;
        let outcome = self.search_or_create(&request).await;
        guard.release().await;
        outcome
    }

    async fn search_or_create(&self, request: &EnsureDiscussion) -> Result<DiscussionSummary> {
        if let Some(existing) = self.search_by_doc_id(&request.doc_id).await? {
            return Ok(existing);
        }
        let body = build_discussion_body(request);
        match self.create_for_doc(&request.doc_id, &body).await? {
            Some(created) => {
                info!(discussion_id = %created.id, "created discussion for doc");
                Ok(created)
            }
            None => Err(DiscussionError::CreationFailed(
                "Failed to create discussion for docId".to_string(),
            )),
        }
    }

    #[instrument(skip(self, request), fields(discussion_id = %request.discussion_id))]
    pub async fn add_comment(&self, request: AddComment) -> Result<Option<DiscussionComment>> {
        let token = ensure_token(Some(request.token.as_str()), "addDiscussionComment")?;
        let data: AddCommentData = self
            .client
            .graphql(
                token,
                ADD_DISCUSSION_COMMENT,
                ADD_DISCUSSION_COMMENT_MUTATION,
                json!({ "discussionId": request.discussion_id, "body": request.body }),
                RequestKind::Mutation,
            )
            .await?;
        let comment = data.add_discussion_comment.and_then(|payload| payload.comment);
        if let Some(comment) = &comment {
            comment.validate()?;
        }
        Ok(comment)
    }

    #[instrument(skip(self, request), fields(comment_id = %request.comment_id))]
    pub async fn add_reply(&self, request: AddReply) -> Result<Option<DiscussionReply>> {
        let token = ensure_token(Some(request.token.as_str()), "addDiscussionReply")?;
        let data: AddReplyData = self
            .client
            .graphql(
                token,
                ADD_DISCUSSION_REPLY,
                ADD_DISCUSSION_REPLY_MUTATION,
                json!({ "commentId": request.comment_id, "body": request.body }),
                RequestKind::Mutation,
            )
            .await?;
        let reply = data.add_discussion_reply.and_then(|payload| payload.comment);
        if let Some(reply) = &reply {
            reply.validate()?;
        }
        Ok(reply)
    }

    /// The validated read view for a doc: an empty collection when no
    /// discussion exists yet.
    pub async fn discussion_response(
        &self,
        doc_id: &str,
        options: FetchOptions,
    ) -> Result<DiscussionResponse> {
        let response = match self.search_by_doc_id(doc_id).await? {
            None => DiscussionResponse::empty(doc_id),
            Some(summary) => {
                let thread = self.fetch_with_comments(&summary.id, options).await?;
                self.thread_response(doc_id, thread)
            }
        };
        response.validate()?;
        Ok(response)
    }

    /// Re-fetches a discussion after a mutation so callers see server state.
    pub async fn refreshed_response(
        &self,
        doc_id: &str,
        discussion_id: &str,
    ) -> Result<DiscussionResponse> {
        let thread = self
            .fetch_with_comments(discussion_id, FetchOptions::default())
            .await?;
        let response = self.thread_response(doc_id, thread);
        response.validate()?;
        Ok(response)
    }

    fn thread_response(&self, doc_id: &str, thread: DiscussionThread) -> DiscussionResponse {
        DiscussionResponse {
            doc_id: doc_id.to_string(),
            discussion: thread.discussion,
            comments: thread.comments.unwrap_or_default(),
        }
    }
}
