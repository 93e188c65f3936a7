use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use db::Repositories;
use discussions::{
    AddComment, AddReply, DiscussionComment, DiscussionReply, DiscussionResponse, DiscussionService,
    EnsureDiscussion, FetchOptions,
};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::instrument;

use crate::dto::{
    normalize_doc_path, parse_page_size, CreateCommentBody, CreateReplyBody, DiscussionQuery,
    DocContributorsDto, MutationResponse, PathQuery,
};
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ApiState {
    pub discussions: Arc<DiscussionService>,
    /// Contributor ledger; `None` when the API runs without a database.
    pub repositories: Option<Arc<dyn Repositories>>,
    /// Repository-relative docs root used to resolve `/docs/by-path` lookups.
    pub docs_dir: String,
    pub metrics_path: String,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/discussions/:doc_id", get(get_discussion))
        .route("/discussions/:doc_id/comments", post(create_comment))
        .route("/discussions/:doc_id/replies", post(create_reply))
        .route("/docs/by-path", get(doc_by_path))
        .route("/docs/:doc_id/contributors", get(doc_contributors))
        .route(&metrics_path, get(metrics))
        .with_state(state)
}

static DISCUSSION_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "api_discussion_requests_total",
        "Discussion route calls grouped by route and response code",
        &["route", "code"]
    )
    .expect("api discussion requests")
});

fn record<T>(route: &str, result: &ApiResult<T>) {
    let code = match result {
        Ok(_) => "OK",
        Err(err) => err.code(),
    };
    DISCUSSION_REQUESTS.with_label_values(&[route, code]).inc();
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn require_doc_id(raw: &str) -> ApiResult<String> {
    let doc_id = raw.trim();
    if doc_id.is_empty() {
        return Err(ApiError::bad_request("docId is required"));
    }
    Ok(doc_id.to_string())
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request("request body must be valid JSON"))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[instrument(skip(state))]
async fn get_discussion(
    State(state): State<Arc<ApiState>>,
    Path(doc_id): Path<String>,
    Query(query): Query<DiscussionQuery>,
) -> ApiResult<Json<DiscussionResponse>> {
    let result: ApiResult<Json<DiscussionResponse>> = async {
        let doc_id = require_doc_id(&doc_id)?;
        let options = FetchOptions {
            comment_cursor: trimmed(query.cursor),
            comment_page_size: parse_page_size(query.page_size.as_deref()),
            reply_page_size: parse_page_size(query.reply_page_size.as_deref()),
        };
        let response = state
            .discussions
            .discussion_response(&doc_id, options)
            .await?;
        Ok(Json(response))
    }
    .await;
    record("get_discussion", &result);
    result
}

#[instrument(skip(state, headers, body))]
async fn create_comment(
    State(state): State<Arc<ApiState>>,
    Path(doc_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<MutationResponse<DiscussionComment>>)> {
    let result: ApiResult<(StatusCode, Json<MutationResponse<DiscussionComment>>)> = async {
        let doc_id = require_doc_id(&doc_id)?;
        let payload: CreateCommentBody = parse_json(&body)?;
        let comment_body = trimmed(payload.body)
            .ok_or_else(|| ApiError::bad_request("comment body must not be empty"))?;
        let token = bearer_token(&headers)
            .ok_or_else(|| ApiError::unauthorized("sign in with GitHub to comment"))?;

        let discussion = state
            .discussions
            .ensure_for_doc(EnsureDiscussion {
                doc_id: doc_id.clone(),
                doc_path: trimmed(payload.doc_path),
                doc_title: trimmed(payload.doc_title),
                doc_url: trimmed(payload.doc_url),
            })
            .await?;
        let created = state
            .discussions
            .add_comment(AddComment {
                discussion_id: discussion.id.clone(),
                body: comment_body,
                token,
            })
            .await?;
        let refreshed = state
            .discussions
            .refreshed_response(&doc_id, &discussion.id)
            .await?;

        Ok((
            StatusCode::CREATED,
            Json(MutationResponse {
                doc_id,
                discussion: refreshed.discussion,
                comments: refreshed.comments,
                created,
            }),
        ))
    }
    .await;
    record("create_comment", &result);
    result
}

#[instrument(skip(state, headers, body))]
async fn create_reply(
    State(state): State<Arc<ApiState>>,
    Path(doc_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<MutationResponse<DiscussionReply>>)> {
    let result: ApiResult<(StatusCode, Json<MutationResponse<DiscussionReply>>)> = async {
        let doc_id = require_doc_id(&doc_id)?;
        let payload: CreateReplyBody = parse_json(&body)?;
        let (reply_body, comment_id) = match (trimmed(payload.body), trimmed(payload.comment_id)) {
            (Some(body), Some(comment_id)) => (body, comment_id),
            _ => {
                return Err(ApiError::bad_request(
                    "commentId and reply body must not be empty",
                ))
            }
        };
        let token = bearer_token(&headers)
            .ok_or_else(|| ApiError::unauthorized("sign in with GitHub to reply"))?;

        let discussion = state
            .discussions
            .search_by_doc_id(&doc_id)
            .await?
            .ok_or_else(|| ApiError::not_found("no discussion exists for this doc yet"))?;
        let created = state
            .discussions
            .add_reply(AddReply {
                comment_id,
                body: reply_body,
                token,
            })
            .await?;
        let refreshed = state
            .discussions
            .refreshed_response(&doc_id, &discussion.id)
            .await?;

        Ok((
            StatusCode::CREATED,
            Json(MutationResponse {
                doc_id,
                discussion: refreshed.discussion,
                comments: refreshed.comments,
                created,
            }),
        ))
    }
    .await;
    record("create_reply", &result);
    result
}

fn ledger(state: &ApiState) -> ApiResult<&Arc<dyn Repositories>> {
    state
        .repositories
        .as_ref()
        .ok_or_else(|| ApiError::Internal("contributor ledger is not configured".to_string()))
}

async fn contributors_for(
    repos: &Arc<dyn Repositories>,
    doc: db::DocRow,
) -> ApiResult<DocContributorsDto> {
    let paths = repos.docs().list_paths(&doc.id).await?;
    let rows = repos.contributors().list_for_doc(&doc.id).await?;
    Ok(DocContributorsDto::new(doc, paths, rows)?)
}

#[instrument(skip(state))]
async fn doc_contributors(
    State(state): State<Arc<ApiState>>,
    Path(doc_id): Path<String>,
) -> ApiResult<Json<DocContributorsDto>> {
    let doc_id = require_doc_id(&doc_id)?;
    let repos = ledger(&state)?;
    let doc = repos
        .docs()
        .get(&doc_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("doc {doc_id} not found")))?;
    Ok(Json(contributors_for(repos, doc).await?))
}

#[instrument(skip(state))]
async fn doc_by_path(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<DocContributorsDto>> {
    let path = trimmed(query.path).ok_or_else(|| ApiError::bad_request("path is required"))?;
    let path = normalize_doc_path(&state.docs_dir, &path);
    let repos = ledger(&state)?;
    let doc = repos
        .docs()
        .find_by_path(&path)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no doc recorded at {path}")))?;
    Ok(Json(contributors_for(repos, doc).await?))
}

#[instrument(skip_all)]
async fn metrics() -> ApiResult<impl IntoResponse> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let content_type = encoder.format_type().to_string();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        buffer,
    ))
}
