use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::config::DiscussionsConfig;
use discussions::{CreationLock, DiscussionService, KeyedMutexLock, MetadataCache};
use gh_test_fixture::FakeGithub;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use api::{build_router, ApiState};

const SERVER_TOKEN: &str = "server-token";

fn app_with(fake: &FakeGithub, server_token: Option<&str>) -> Router {
    let discussions = DiscussionService::new(
        fake.client(),
        DiscussionsConfig::default(),
        server_token.map(str::to_string),
        Arc::new(MetadataCache::new()),
        Arc::new(KeyedMutexLock::new()) as Arc<dyn CreationLock>,
    );
    build_router(Arc::new(ApiState {
        discussions: Arc::new(discussions),
        repositories: None,
        docs_dir: "app/docs".to_string(),
        metrics_path: "/metrics".to_string(),
    }))
}

fn app(fake: &FakeGithub) -> Router {
    app_with(fake, Some(SERVER_TOKEN))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(request).await.unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn missing_discussion_reads_as_empty_collection() {
    let fake = FakeGithub::default();
    let (status, body) = send(&app(&fake), get("/discussions/abc123")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["docId"], "abc123");
    assert!(body["discussion"].is_null());
    assert_eq!(body["comments"]["totalCount"], 0);
    assert_eq!(body["comments"]["pageInfo"]["hasNextPage"], false);
    assert_eq!(fake.discussion_count(), 0);
}

#[tokio::test]
async fn blank_doc_id_is_rejected() {
    let fake = FakeGithub::default();
    let (status, body) = send(&app(&fake), get("/discussions/%20%20")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn comment_validation_runs_before_github() {
    let fake = FakeGithub::default();
    let app = app(&fake);

    let (status, body) = send(
        &app,
        post("/discussions/abc123/comments", Some("alice"), "{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        post("/discussions/abc123/comments", Some("alice"), r#"{"body":"   "}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        post("/discussions/abc123/comments", None, r#"{"body":"hi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn comment_creates_discussion_and_is_visible_on_read() {
    let fake = FakeGithub::default();
    let app = app(&fake);

    let (status, body) = send(
        &app,
        post(
            "/discussions/abc123/comments",
            Some("alice"),
            &json!({ "body": "Nice page", "docPath": "app/docs/intro.mdx", "docTitle": "Intro" })
                .to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["docId"], "abc123");
    assert_eq!(body["discussion"]["title"], "abc123");
    assert_eq!(body["created"]["body"], "Nice page");
    assert_eq!(body["created"]["author"]["login"], "alice");
    assert_eq!(body["comments"]["totalCount"], 1);
    assert_eq!(fake.discussion_count(), 1);

    let (status, body) = send(&app, get("/discussions/abc123?pageSize=5&replyPageSize=x")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["comments"]["nodes"][0]["body"], "Nice page");

    let (status, _) = send(
        &app,
        post("/discussions/abc123/comments", Some("bob"), r#"{"body":"Second"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(fake.discussion_count(), 1);
    assert_eq!(fake.operation_count("CreateDiscussion"), 1);
}

#[tokio::test]
async fn reply_requires_an_existing_discussion() {
    let fake = FakeGithub::default();
    let app = app(&fake);

    let (status, body) = send(
        &app,
        post(
            "/discussions/abc123/replies",
            Some("alice"),
            r#"{"body":"hi","commentId":"DC_1"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (_, created) = send(
        &app,
        post("/discussions/abc123/comments", Some("alice"), r#"{"body":"Question"}"#),
    )
    .await;
    let comment_id = created["created"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post(
            "/discussions/abc123/replies",
            Some("bob"),
            &json!({ "body": "Answer", "commentId": comment_id }).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["created"]["author"]["login"], "bob");
    assert_eq!(body["comments"]["nodes"][0]["replies"]["totalCount"], 1);
}

#[tokio::test]
async fn reply_without_comment_id_is_rejected() {
    let fake = FakeGithub::default();
    let (status, body) = send(
        &app(&fake),
        post("/discussions/abc123/replies", Some("alice"), r#"{"body":"hi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway() {
    let fake = FakeGithub::default();
    fake.fail_operation("SearchDiscussionByDocId", 503);
    let (status, body) = send(&app(&fake), get("/discussions/abc123")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "GITHUB_ERROR");
    assert!(body["message"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn missing_server_token_is_a_configuration_error() {
    let fake = FakeGithub::default();
    let (status, body) = send(&app_with(&fake, None), get("/discussions/abc123")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "GITHUB_ERROR");
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let fake = FakeGithub::default();
    let app = app(&fake);

    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    send(&app, get("/discussions/abc123")).await;
    let res = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("api_discussion_requests_total"));
}
