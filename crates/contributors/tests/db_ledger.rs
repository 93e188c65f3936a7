use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use contributors::{BackfillJob, BackfillOptions, GithubCommitSource};
use db::pg::PgDatabase;
use db::Repositories;
use db_test_fixture::DbFixture;
use gh_test_fixture::{FakeCommit, FakeGithub};
use tokio::sync::watch;

fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
}

fn write_doc(root: &Path, relative: &str, doc_id: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("---\ndocId: {doc_id}\n---\n")).unwrap();
}

fn job(root: &Path, fake: &FakeGithub, repos: Arc<dyn Repositories>) -> BackfillJob {
    BackfillJob::new(
        BackfillOptions {
            repo: "InvolutionHell/involutionhell.github.io".into(),
            repo_root: root.to_path_buf(),
            docs_dir: "app/docs".into(),
            concurrency: 2,
            deadline: None,
        },
        Arc::new(GithubCommitSource::new(
            fake.client(),
            "InvolutionHell",
            "involutionhell.github.io",
            None,
            100,
        )),
        repos,
    )
}

#[tokio::test]
async fn postgres_ledger_accumulates_across_runs() -> Result<()> {
    let fixture = match DbFixture::from_env() {
        Ok(f) => f,
        Err(err) => {
            eprintln!("skipping postgres_ledger_accumulates_across_runs: {err}");
            return Ok(());
        }
    };
    let handle = fixture.create("contrib").await?;
    let db = Arc::new(PgDatabase::connect(handle.database_url()).await?);
    let repos: Arc<dyn Repositories> = db.clone();

    let dir = tempfile::tempdir()?;
    write_doc(dir.path(), "app/docs/a.md", "docaaa");
    let fake = FakeGithub::default();
    fake.add_commits(
        "app/docs/a.md",
        vec![FakeCommit::new("a2", 5, at(2)), FakeCommit::new("a1", 6, at(1))],
    );

    job(dir.path(), &fake, repos.clone()).run(watch::channel(false).1).await?;

    fs::remove_file(dir.path().join("app/docs/a.md"))?;
    write_doc(dir.path(), "app/docs/moved/a.md", "docaaa");
    fake.add_commits("app/docs/moved/a.md", vec![FakeCommit::new("a3", 5, at(3))]);
    let report = job(dir.path(), &fake, repos.clone())
        .run(watch::channel(false).1)
        .await?;
    assert!(report.errors.is_empty());

    let doc = repos.docs().get("docaaa").await?.expect("doc row");
    assert_eq!(doc.path_current.as_deref(), Some("app/docs/moved/a.md"));
    let stats = doc.stats()?;
    assert_eq!(stats.get("5"), Some(&2));
    assert_eq!(stats.get("6"), Some(&1));
    assert_eq!(
        repos.docs().list_paths("docaaa").await?,
        vec!["app/docs/a.md", "app/docs/moved/a.md"]
    );
    let by_old_path = repos.docs().find_by_path("app/docs/a.md").await?;
    assert_eq!(by_old_path.map(|d| d.id).as_deref(), Some("docaaa"));

    let contributors = repos.contributors().list_for_doc("docaaa").await?;
    assert_eq!(contributors[0].github_id, 5);
    assert_eq!(contributors[0].last_contributed_at, Some(at(3)));

    handle.cleanup().await?;
    Ok(())
}
