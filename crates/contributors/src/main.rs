use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{config::AppConfig, logging};
use contributors::docid::assign_missing_ids;
use contributors::report::write_report;
use contributors::{BackfillJob, BackfillOptions, CommitSource, GithubCommitSource, MemoryLedger};
use db::pg::PgDatabase;
use db::Repositories;
use gh_client::GithubClientBuilder;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "contributors", about = "Per-doc contributor ledger maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate commit history into the per-doc contributor ledger.
    Backfill(BackfillArgs),
    /// Write a fresh docId into every doc that lacks one.
    AssignIds(AssignArgs),
}

#[derive(Args)]
struct BackfillArgs {
    #[arg(long, env = "GITHUB_OWNER")]
    owner: Option<String>,
    #[arg(long, env = "GITHUB_REPO")]
    repo: Option<String>,
    #[arg(long, env = "DOCS_DIR")]
    docs: Option<String>,
    #[arg(long, env = "OUTPUT")]
    output: Option<PathBuf>,
    #[arg(long)]
    repo_root: Option<PathBuf>,
    #[arg(long)]
    sync_db: bool,
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct AssignArgs {
    #[arg(long, env = "DOCS_DIR")]
    docs: Option<String>,
    #[arg(long)]
    repo_root: Option<PathBuf>,
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    logging::init_tracing("contributors", "info");

    let result = match cli.command {
        Command::Backfill(args) => backfill(config, args).await,
        Command::AssignIds(args) => assign_ids(config, args),
    };
    logging::shutdown_tracer_provider();
    result
}

async fn backfill(config: AppConfig, args: BackfillArgs) -> Result<()> {
    let settings = &config.contributors;
    let owner = args.owner.unwrap_or_else(|| settings.owner.clone());
    let repo = args.repo.unwrap_or_else(|| settings.repo.clone());
    let docs_dir = args.docs.unwrap_or_else(|| settings.docs_dir.clone());
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&settings.output));
    let repo_root = args
        .repo_root
        .unwrap_or_else(|| PathBuf::from(&settings.repo_root));
    let sync_db = args.sync_db || settings.sync_db;
    let concurrency = args
        .concurrency
        .unwrap_or_else(|| settings.effective_concurrency())
        .max(1);

    let token = config.github.resolved_token();
    if token.is_none() {
        warn!("no GitHub token configured; commit history requests are unauthenticated");
    }
    let client = GithubClientBuilder::from_config(&config.github).build()?;
    let source: Arc<dyn CommitSource> = Arc::new(GithubCommitSource::new(
        client,
        owner.clone(),
        repo.clone(),
        token,
        settings.effective_per_page(),
    ));

    let repos: Arc<dyn Repositories> = if sync_db {
        let url = config
            .database_url()
            .ok_or_else(|| anyhow!("--sync-db requires DATABASE_URL"))?;
        Arc::new(
            PgDatabase::connect_with(&url, config.database_max_connections())
                .await
                .context("connecting to database")?,
        )
    } else {
        Arc::new(MemoryLedger::new())
    };

    let job = BackfillJob::new(
        BackfillOptions {
            repo: format!("{owner}/{repo}"),
            repo_root,
            docs_dir,
            concurrency,
            deadline: Some(Duration::from_secs(settings.job_deadline_secs)),
        },
        source,
        repos,
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling remaining docs");
            let _ = cancel_tx.send(true);
        }
    });

    info!(owner = %owner, repo = %repo, sync_db, concurrency, "contributor backfill started");
    let report = job.run(cancel_rx).await?;
    write_report(&output, &report).await?;
    info!(
        docs = report.total_docs,
        failed = report.failed_docs(),
        skipped_files = report.skipped_files.len(),
        output = %output.display(),
        "contributor backfill finished"
    );
    Ok(())
}

fn assign_ids(config: AppConfig, args: AssignArgs) -> Result<()> {
    let docs_dir = args
        .docs
        .unwrap_or_else(|| config.contributors.docs_dir.clone());
    let repo_root = args
        .repo_root
        .unwrap_or_else(|| PathBuf::from(&config.contributors.repo_root));

    let report = assign_missing_ids(&repo_root, &docs_dir, args.dry_run, &mut rand::thread_rng())?;
    info!(
        assigned = report.assigned.len(),
        already_tagged = report.already_tagged,
        suspicious = report.suspicious.len(),
        failed = report.failed.len(),
        dry_run = report.dry_run,
        "docId assignment finished"
    );
    for file in &report.failed {
        error!(path = %file.path, reason = %file.reason, "doc left untouched");
    }
    if !report.failed.is_empty() {
        bail!("{} doc(s) could not be tagged", report.failed.len());
    }
    Ok(())
}
