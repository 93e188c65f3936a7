use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use common::config::DiscussionsConfig;
use db::repositories::*;
use db::{DocContributorRow, DocRow, DocUpdate};
use discussions::{DiscussionService, KeyedMutexLock, MetadataCache};
use gh_test_fixture::FakeGithub;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use api::{build_router, ApiState};

// --- Test doubles for repository traits ---

struct StaticDocs {
    doc: DocRow,
    paths: Vec<String>,
}

#[async_trait::async_trait]
impl DocRepository for StaticDocs {
    async fn get(&self, doc_id: &str) -> db::errors::Result<Option<DocRow>> {
        Ok((doc_id == self.doc.id).then(|| self.doc.clone()))
    }
    async fn find_by_path(&self, path: &str) -> db::errors::Result<Option<DocRow>> {
        Ok(self
            .paths
            .iter()
            .any(|p| p == path)
            .then(|| self.doc.clone()))
    }
    async fn list_paths(&self, _doc_id: &str) -> db::errors::Result<Vec<String>> {
        Ok(self.paths.clone())
    }
    async fn apply_update(&self, _update: DocUpdate) -> db::errors::Result<DocRow> {
        panic!("unused")
    }
}

struct StaticContributors {
    rows: Vec<DocContributorRow>,
}

#[async_trait::async_trait]
impl ContributorRepository for StaticContributors {
    async fn list_for_doc(&self, doc_id: &str) -> db::errors::Result<Vec<DocContributorRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.doc_id == doc_id)
            .cloned()
            .collect())
    }
}

struct TestRepos {
    docs: StaticDocs,
    contributors: StaticContributors,
}

impl Repositories for TestRepos {
    fn docs(&self) -> &dyn DocRepository {
        &self.docs
    }
    fn contributors(&self) -> &dyn ContributorRepository {
        &self.contributors
    }
}

fn row(github_id: i64, contributions: i32) -> DocContributorRow {
    DocContributorRow {
        doc_id: "abc123".into(),
        github_id,
        login: Some(format!("user{github_id}")),
        avatar_url: None,
        html_url: Some(format!("https://github.com/user{github_id}")),
        contributions,
        last_contributed_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
    }
}

fn setup_app(repositories: Option<Arc<dyn Repositories>>) -> Router {
    let fake = FakeGithub::default();
    let discussions = DiscussionService::new(
        fake.client(),
        DiscussionsConfig::default(),
        Some("server-token".to_string()),
        Arc::new(MetadataCache::new()),
        Arc::new(KeyedMutexLock::new()),
    );
    build_router(Arc::new(ApiState {
        discussions: Arc::new(discussions),
        repositories,
        docs_dir: "app/docs".to_string(),
        metrics_path: "/metrics".to_string(),
    }))
}

fn seeded() -> Arc<dyn Repositories> {
    seeded_with_stats(json!({ "1": 2, "2": 1 }))
}

fn seeded_with_stats(contributor_stats: Value) -> Arc<dyn Repositories> {
    let now = Utc::now();
    Arc::new(TestRepos {
        docs: StaticDocs {
            doc: DocRow {
                id: "abc123".into(),
                path_current: Some("app/docs/guide/new.md".into()),
                title: Some("Intro".into()),
                contributor_stats,
                created_at: now,
                updated_at: now,
            },
            paths: vec!["app/docs/guide/new.md".into(), "app/docs/old.md".into()],
        },
        contributors: StaticContributors {
            rows: vec![row(1, 2), row(2, 1)],
        },
    })
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let res = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn contributors_by_doc_id() {
    let app = setup_app(Some(seeded()));
    let (status, body) = get(&app, "/docs/abc123/contributors").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["docId"], "abc123");
    assert_eq!(body["path"], "app/docs/guide/new.md");
    assert_eq!(body["paths"].as_array().unwrap().len(), 2);
    assert_eq!(body["contributorStats"]["1"], 2);
    assert_eq!(body["contributors"][0]["githubId"], 1);
    assert_eq!(body["contributors"][0]["login"], "user1");
    assert_eq!(body["contributors"][1]["contributions"], 1);
}

#[tokio::test]
async fn contributors_by_historical_path() {
    let app = setup_app(Some(seeded()));
    let (status, body) = get(&app, "/docs/by-path?path=/app/docs/old.md").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["docId"], "abc123");

    let (status, body) = get(&app, "/docs/by-path?path=guide/new.md").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["docId"], "abc123");

    let (status, body) = get(&app, "/docs/by-path?path=%5Cguide%5Cnew.md").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "app/docs/guide/new.md");

    let (status, body) = get(&app, "/docs/by-path?path=missing.md").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = get(&app, "/docs/by-path?path=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_doc_is_not_found() {
    let app = setup_app(Some(seeded()));
    let (status, body) = get(&app, "/docs/zzz999/contributors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn ledger_routes_need_a_database() {
    let app = setup_app(None);
    let (status, body) = get(&app, "/docs/abc123/contributors").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn malformed_snapshot_is_an_internal_error() {
    let app = setup_app(Some(seeded_with_stats(json!({ "1": "two" }))));
    let (status, body) = get(&app, "/docs/abc123/contributors").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
}
