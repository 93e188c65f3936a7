//! In-memory stand-in for the slice of the GitHub GraphQL and REST APIs the
//! discussion service and the contributor job talk to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use gh_client::{GithubClient, HttpExec};
use http::{header, Method, Request, Response};
use serde_json::{json, Value};
use url::Url;

pub const DEFAULT_REPO: &str = "InvolutionHell/involutionhell.github.io";
pub const REPOSITORY_ID: &str = "R_kgDOfake";
pub const GRAPHQL_URL: &str = "https://fake.github.test/graphql";
pub const API_URL: &str = "https://fake.github.test/";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: String,
    pub operation: Option<String>,
    pub variables: Value,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FakeCategory {
    pub id: String,
    pub name: String,
    pub slug: String,
}

impl FakeCategory {
    pub fn new(id: &str, name: &str, slug: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            slug: slug.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeReply {
    id: String,
    body: String,
    author: String,
    created_at: DateTime<Utc>,
    url: String,
}

#[derive(Debug, Clone)]
struct FakeComment {
    reply: FakeReply,
    replies: Vec<FakeReply>,
}

#[derive(Debug, Clone)]
struct FakeDiscussion {
    id: String,
    number: u64,
    repo: String,
    title: String,
    body: String,
    category_id: String,
    created_at: DateTime<Utc>,
    comments: Vec<FakeComment>,
}

impl FakeDiscussion {
    fn url(&self) -> String {
        format!("https://github.com/{}/discussions/{}", self.repo, self.number)
    }

    fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "number": self.number,
            "title": self.title,
            "url": self.url(),
            "createdAt": self.created_at,
            "repository": { "nameWithOwner": self.repo },
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeCommit {
    pub sha: String,
    pub author_id: Option<i64>,
    pub login: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl FakeCommit {
    pub fn new(sha: &str, author_id: i64, date: DateTime<Utc>) -> Self {
        Self {
            sha: sha.to_string(),
            author_id: Some(author_id),
            login: Some(format!("user{author_id}")),
            date: Some(date),
        }
    }

    pub fn anonymous(sha: &str, date: DateTime<Utc>) -> Self {
        Self {
            sha: sha.to_string(),
            author_id: None,
            login: None,
            date: Some(date),
        }
    }

    fn to_json(&self) -> Value {
        let author = self.author_id.map(|id| {
            json!({
                "id": id,
                "login": self.login,
                "avatar_url": format!("https://avatars.githubusercontent.com/u/{id}"),
                "html_url": self.login.as_ref().map(|login| format!("https://github.com/{login}")),
            })
        });
        json!({
            "sha": self.sha,
            "author": author,
            "commit": {
                "author": { "date": self.date },
                "committer": { "date": self.date },
            },
        })
    }
}

#[derive(Default)]
struct State {
    repository: Option<String>,
    categories: Vec<FakeCategory>,
    discussions: Vec<FakeDiscussion>,
    search_ignores_repo: bool,
    commits: HashMap<String, Vec<FakeCommit>>,
    rate_limited: HashMap<String, i64>,
    failing_operations: HashMap<String, u16>,
    empty_mutations: HashSet<String>,
    requests: Vec<RecordedRequest>,
    next_id: u64,
    clock: i64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + Duration::seconds(self.clock)
    }
}

/// A fake GitHub that implements [`HttpExec`], so a real [`GithubClient`]
/// can be pointed at it.
#[derive(Clone)]
pub struct FakeGithub {
    state: Arc<Mutex<State>>,
}

impl Default for FakeGithub {
    fn default() -> Self {
        Self::new(DEFAULT_REPO)
    }
}

impl FakeGithub {
    pub fn new(repo: &str) -> Self {
        let state = State {
            repository: Some(repo.to_string()),
            categories: vec![
                FakeCategory::new("DIC_general", "General", "general"),
                FakeCategory::new("DIC_comments", "Comments", "comments"),
            ],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A client wired to this fake with fast retries.
    pub fn client(&self) -> GithubClient {
        GithubClient::builder()
            .http_exec(Arc::new(self.clone()))
            .graphql_url(GRAPHQL_URL)
            .api_url(API_URL)
            .backoff(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(5),
                0.0,
            )
            .build()
            .expect("fake GitHub client")
    }

    pub fn set_categories(&self, categories: Vec<FakeCategory>) {
        self.state().categories = categories;
    }

    pub fn remove_repository(&self) {
        self.state().repository = None;
    }

    /// Mimics a search index that ignores the `repo:` qualifier.
    pub fn set_search_ignores_repo(&self, ignore: bool) {
        self.state().search_ignores_repo = ignore;
    }

    /// Seeds a discussion directly, optionally in another repository.
    pub fn seed_discussion(&self, repo: &str, title: &str) -> String {
        let mut state = self.state();
        let number = state.next_id();
        let created_at = state.now();
        let id = format!("D_{number}");
        state.discussions.push(FakeDiscussion {
            id: id.clone(),
            number,
            repo: repo.to_string(),
            title: title.to_string(),
            body: String::new(),
            category_id: "DIC_general".to_string(),
            created_at,
            comments: Vec::new(),
        });
        id
    }

    pub fn discussion_count(&self) -> usize {
        self.state().discussions.len()
    }

    pub fn discussion_body(&self, id: &str) -> Option<String> {
        self.state()
            .discussions
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.body.clone())
    }

    pub fn discussion_category(&self, id: &str) -> Option<String> {
        self.state()
            .discussions
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.category_id.clone())
    }

    pub fn add_commits(&self, path: &str, commits: Vec<FakeCommit>) {
        self.state()
            .commits
            .entry(path.to_string())
            .or_default()
            .extend(commits);
    }

    /// Every commit request for `path` answers 403 with `x-ratelimit-reset`.
    pub fn rate_limit_path(&self, path: &str, reset_epoch: i64) {
        self.state()
            .rate_limited
            .insert(path.to_string(), reset_epoch);
    }

    pub fn fail_operation(&self, operation: &str, status: u16) {
        self.state()
            .failing_operations
            .insert(operation.to_string(), status);
    }

    /// The mutation succeeds but returns a null payload.
    pub fn empty_mutation(&self, operation: &str) {
        self.state().empty_mutations.insert(operation.to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn operation_count(&self, operation: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.operation.as_deref() == Some(operation))
            .count()
    }

    pub fn commit_paths_requested(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == Method::GET)
            .filter_map(|r| Url::parse(&r.uri).ok())
            .filter_map(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == "path")
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    }

    fn handle_graphql(&self, token: Option<String>, body: &[u8]) -> Result<Response<Vec<u8>>> {
        let payload: Value = serde_json::from_slice(body).context("graphql body")?;
        let operation = payload
            .get("operationName")
            .and_then(Value::as_str)
            .map(str::to_string);
        let variables = payload.get("variables").cloned().unwrap_or(Value::Null);

        let mut state = self.state();
        state.requests.push(RecordedRequest {
            method: Method::POST,
            uri: GRAPHQL_URL.to_string(),
            operation: operation.clone(),
            variables: variables.clone(),
            token: token.clone(),
        });

        let operation = operation.unwrap_or_default();
        if let Some(status) = state.failing_operations.get(&operation) {
            return respond(*status, json!({ "message": "injected failure" }));
        }

        let login = token.unwrap_or_else(|| "anonymous".to_string());
        let data = match operation.as_str() {
            "ResolveRepositoryMetadata" => resolve_metadata(&state, &variables),
            "SearchDiscussionByDocId" => search(&state, &variables),
            "DiscussionWithComments" => match discussion_with_comments(&state, &variables) {
                Some(data) => data,
                None => {
                    return respond(
                        200,
                        json!({
                            "data": { "node": null },
                            "errors": [{
                                "type": "NOT_FOUND",
                                "message": "Could not resolve to a node with the global id",
                            }],
                        }),
                    )
                }
            },
            "CreateDiscussion" if state.empty_mutations.contains(&operation) => {
                json!({ "createDiscussion": null })
            }
            "CreateDiscussion" => create_discussion(&mut state, &variables)?,
            "AddDiscussionComment" => add_comment(&mut state, &variables, &login)?,
            "AddDiscussionReply" => add_reply(&mut state, &variables, &login)?,
            other => return respond(200, json!({ "errors": [{ "message": format!("unknown operation {other}") }] })),
        };
        respond(200, json!({ "data": data }))
    }

    fn handle_commits(&self, token: Option<String>, uri: &str) -> Result<Response<Vec<u8>>> {
        let url = Url::parse(uri).context("commits uri")?;
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let path = query.get("path").cloned().unwrap_or_default();
        let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
        let per_page: usize = query
            .get("per_page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(30)
            .max(1);

        let mut state = self.state();
        state.requests.push(RecordedRequest {
            method: Method::GET,
            uri: uri.to_string(),
            operation: None,
            variables: Value::Null,
            token,
        });

        if let Some(reset) = state.rate_limited.get(&path) {
            return Ok(Response::builder()
                .status(403)
                .header("x-ratelimit-remaining", "0")
                .header("x-ratelimit-reset", reset.to_string())
                .body(br#"{"message":"API rate limit exceeded"}"#.to_vec())?);
        }

        let commits = state.commits.get(&path).cloned().unwrap_or_default();
        let start = (page - 1) * per_page;
        let slice: Vec<Value> = commits
            .iter()
            .skip(start)
            .take(per_page)
            .map(FakeCommit::to_json)
            .collect();
        let mut builder = Response::builder().status(200);
        if start + per_page < commits.len() {
            builder = builder.header(
                header::LINK,
                format!(
                    "<{API_URL}repositories/1/commits?page={}>; rel=\"next\"",
                    page + 1
                ),
            );
        }
        Ok(builder.body(serde_json::to_vec(&slice)?)?)
    }
}

#[async_trait]
impl HttpExec for FakeGithub {
    async fn execute(&self, req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        let uri = req.uri().to_string();
        if req.method() == Method::POST && req.uri().path() == "/graphql" {
            self.handle_graphql(token, req.body())
        } else if req.method() == Method::GET && req.uri().path().ends_with("/commits") {
            self.handle_commits(token, &uri)
        } else {
            respond(404, json!({ "message": "Not Found" }))
        }
    }
}

fn respond(status: u16, body: Value) -> Result<Response<Vec<u8>>> {
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(&body)?)?)
}

fn str_var<'a>(variables: &'a Value, name: &str) -> Option<&'a str> {
    variables.get(name).and_then(Value::as_str)
}

fn resolve_metadata(state: &State, variables: &Value) -> Value {
    let requested = format!(
        "{}/{}",
        str_var(variables, "owner").unwrap_or_default(),
        str_var(variables, "repo").unwrap_or_default()
    );
    match &state.repository {
        Some(repo) if repo.eq_ignore_ascii_case(&requested) => json!({
            "repository": {
                "id": REPOSITORY_ID,
                "discussionCategories": {
                    "nodes": state.categories.iter().map(|c| json!({
                        "id": c.id,
                        "name": c.name,
                        "slug": c.slug,
                    })).collect::<Vec<_>>(),
                },
            },
        }),
        _ => json!({ "repository": null }),
    }
}

fn search(state: &State, variables: &Value) -> Value {
    let query = str_var(variables, "query").unwrap_or_default();
    let repo = query
        .split_whitespace()
        .find_map(|part| part.strip_prefix("repo:"))
        .unwrap_or_default();
    let term = query
        .split('"')
        .nth(1)
        .unwrap_or_default()
        .to_lowercase();
    let nodes: Vec<Value> = state
        .discussions
        .iter()
        .filter(|d| state.search_ignores_repo || d.repo.eq_ignore_ascii_case(repo))
        .filter(|d| d.title.to_lowercase().contains(&term))
        .take(10)
        .map(FakeDiscussion::summary)
        .collect();
    json!({ "search": { "nodes": nodes } })
}

fn author(login: &str) -> Value {
    json!({
        "login": login,
        "avatarUrl": format!("https://avatars.githubusercontent.com/{login}"),
        "url": format!("https://github.com/{login}"),
    })
}

fn reply_json(reply: &FakeReply) -> Value {
    json!({
        "id": reply.id,
        "body": reply.body,
        "bodyHTML": format!("<p>{}</p>", reply.body),
        "bodyText": reply.body,
        "createdAt": reply.created_at,
        "url": reply.url,
        "author": author(&reply.author),
    })
}

fn page_size(variables: &Value, name: &str, default: usize) -> usize {
    variables
        .get(name)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

fn discussion_with_comments(state: &State, variables: &Value) -> Option<Value> {
    let id = str_var(variables, "id")?;
    let discussion = state.discussions.iter().find(|d| d.id == id)?;
    let comment_page = page_size(variables, "commentPageSize", 25);
    let reply_page = page_size(variables, "replyPageSize", 10);
    let start = str_var(variables, "commentCursor")
        .and_then(|c| c.strip_prefix("cursor:"))
        .and_then(|c| c.parse::<usize>().ok())
        .map(|idx| idx + 1)
        .unwrap_or(0);

    let page: Vec<(usize, &FakeComment)> = discussion
        .comments
        .iter()
        .enumerate()
        .skip(start)
        .take(comment_page)
        .collect();
    let end_cursor = page.last().map(|(idx, _)| format!("cursor:{idx}"));
    let has_next = start + page.len() < discussion.comments.len();
    let nodes: Vec<Value> = page
        .iter()
        .map(|(_, comment)| {
            let mut node = reply_json(&comment.reply);
            let replies: Vec<Value> = comment.replies.iter().take(reply_page).map(reply_json).collect();
            node["isAnswer"] = json!(false);
            node["replies"] = json!({
                "totalCount": comment.replies.len(),
                "pageInfo": {
                    "hasNextPage": comment.replies.len() > reply_page,
                    "endCursor": if replies.is_empty() { Value::Null } else { json!(format!("reply:{}", replies.len() - 1)) },
                },
                "nodes": replies,
            });
            node
        })
        .collect();

    Some(json!({
        "node": {
            "id": discussion.id,
            "number": discussion.number,
            "title": discussion.title,
            "url": discussion.url(),
            "body": discussion.body,
            "createdAt": discussion.created_at,
            "author": author("docs-bot"),
            "comments": {
                "totalCount": discussion.comments.len(),
                "pageInfo": { "hasNextPage": has_next, "endCursor": end_cursor },
                "nodes": nodes,
            },
        },
    }))
}

fn create_discussion(state: &mut State, variables: &Value) -> Result<Value> {
    let repo = state
        .repository
        .clone()
        .ok_or_else(|| anyhow!("repository missing"))?;
    if str_var(variables, "repositoryId") != Some(REPOSITORY_ID) {
        return Ok(json!({ "createDiscussion": null }));
    }
    let category_id = str_var(variables, "categoryId").unwrap_or_default().to_string();
    if !state.categories.iter().any(|c| c.id == category_id) {
        return Ok(json!({ "createDiscussion": null }));
    }
    let number = state.next_id();
    let created_at = state.now();
    let discussion = FakeDiscussion {
        id: format!("D_{number}"),
        number,
        repo,
        title: str_var(variables, "title").unwrap_or_default().to_string(),
        body: str_var(variables, "body").unwrap_or_default().to_string(),
        category_id,
        created_at,
        comments: Vec::new(),
    };
    let summary = discussion.summary();
    state.discussions.push(discussion);
    Ok(json!({ "createDiscussion": { "discussion": summary } }))
}

fn new_reply(state: &mut State, discussion_url: &str, body: &str, login: &str, prefix: &str) -> FakeReply {
    let n = state.next_id();
    FakeReply {
        id: format!("{prefix}_{n}"),
        body: body.to_string(),
        author: login.to_string(),
        created_at: state.now(),
        url: format!("{discussion_url}#discussioncomment-{n}"),
    }
}

fn add_comment(state: &mut State, variables: &Value, login: &str) -> Result<Value> {
    let discussion_id = str_var(variables, "discussionId").unwrap_or_default();
    let body = str_var(variables, "body").unwrap_or_default();
    let Some(index) = state.discussions.iter().position(|d| d.id == discussion_id) else {
        return Ok(json!({ "addDiscussionComment": null }));
    };
    let url = state.discussions[index].url();
    let reply = new_reply(state, &url, body, login, "DC");
    let node = reply_json(&reply);
    state.discussions[index].comments.push(FakeComment {
        reply,
        replies: Vec::new(),
    });
    Ok(json!({ "addDiscussionComment": { "comment": node } }))
}

fn add_reply(state: &mut State, variables: &Value, login: &str) -> Result<Value> {
    let comment_id = str_var(variables, "commentId").unwrap_or_default();
    let body = str_var(variables, "body").unwrap_or_default();
    let location = state.discussions.iter().enumerate().find_map(|(d, discussion)| {
        discussion
            .comments
            .iter()
            .position(|c| c.reply.id == comment_id)
            .map(|c| (d, c))
    });
    let Some((d, c)) = location else {
        return Ok(json!({ "addDiscussionReply": null }));
    };
    let url = state.discussions[d].url();
    let reply = new_reply(state, &url, body, login, "DR");
    let node = reply_json(&reply);
    state.discussions[d].comments[c].replies.push(reply);
    Ok(json!({ "addDiscussionReply": { "comment": node } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh_client::RequestKind;

    #[tokio::test]
    async fn commit_pages_carry_next_links_until_exhausted() {
        let fake = FakeGithub::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        fake.add_commits(
            "app/docs/a.md",
            vec![
                FakeCommit::new("s1", 1, at),
                FakeCommit::new("s2", 2, at),
                FakeCommit::new("s3", 1, at),
            ],
        );
        let client = fake.client();
        let first = client
            .commits_page(None, "InvolutionHell", "involutionhell.github.io", "app/docs/a.md", 1, 2)
            .await
            .unwrap();
        assert_eq!(first.commits.len(), 2);
        assert!(first.has_next);
        let second = client
            .commits_page(None, "InvolutionHell", "involutionhell.github.io", "app/docs/a.md", 2, 2)
            .await
            .unwrap();
        assert_eq!(second.commits.len(), 1);
        assert!(!second.has_next);
    }

    #[tokio::test]
    async fn unknown_node_reports_not_found() {
        let fake = FakeGithub::default();
        let err = fake
            .client()
            .graphql::<Value>(
                "server",
                "DiscussionWithComments",
                "query",
                json!({ "id": "D_missing" }),
                RequestKind::Read,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, gh_client::GithubError::NotFound(_)));
    }
}
