use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use db::{ContributorUpsert, DocUpdate, Repositories};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::aggregate::{dedup_commits, merge_incremental, newest_timestamp, union_paths, Watermark};
use crate::commits::CommitSource;
use crate::metrics::{self, ActiveDocGuard};
use crate::report::{BackfillReport, ContributorReport, DocError, DocReport};
use crate::scan::{group_by_doc_id, scan_docs, DocGroup};

pub const DEADLINE_EXCEEDED: &str = "job deadline exceeded";
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// `owner/repo`, echoed into the report.
    pub repo: String,
    pub repo_root: PathBuf,
    pub docs_dir: String,
    pub concurrency: usize,
    pub deadline: Option<Duration>,
}

pub struct BackfillJob {
    options: BackfillOptions,
    source: Arc<dyn CommitSource>,
    repos: Arc<dyn Repositories>,
}

enum DocOutcome {
    Done(DocReport),
    Failed(DocReport),
}

impl BackfillJob {
    pub fn new(
        options: BackfillOptions,
        source: Arc<dyn CommitSource>,
        repos: Arc<dyn Repositories>,
    ) -> Self {
        Self {
            options,
            source,
            repos,
        }
    }

    /// Aggregates every scanned doc. Per-doc failures are recorded in the
    /// report; only scan errors abort the run. Flipping `shutdown` to `true`
    /// stops in-flight docs and marks the rest as cancelled.
    #[instrument(skip(self, shutdown), fields(repo = %self.options.repo))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<BackfillReport> {
        let run_started = Utc::now();
        metrics::RUNS_TOTAL.inc();
        metrics::LAST_RUN_TIMESTAMP.set(run_started.timestamp());
        let _timer = metrics::RUN_DURATION.start_timer();

        let scan = scan_docs(&self.options.repo_root, &self.options.docs_dir)
            .with_context(|| format!("scanning {}", self.options.docs_dir))?;
        let groups = group_by_doc_id(&scan.docs);
        info!(
            docs = groups.len(),
            files = scan.docs.len(),
            skipped = scan.skipped.len(),
            "scanned docs"
        );

        let deadline = self.options.deadline.map(|limit| Instant::now() + limit);
        let mut outcomes: Vec<(usize, DocOutcome)> = stream::iter(groups.into_iter().enumerate())
            .map(|(index, group)| {
                let shutdown = shutdown.clone();
                async move { (index, self.process_bounded(group, deadline, shutdown).await) }
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                DocOutcome::Done(report) => results.push(report),
                DocOutcome::Failed(report) => {
                    errors.push(DocError {
                        doc_id: report.doc_id.clone(),
                        message: report.error.clone().unwrap_or_default(),
                    });
                    results.push(report);
                }
            }
        }

        info!(
            docs = results.len(),
            errors = errors.len(),
            "backfill run finished"
        );
        Ok(BackfillReport {
            repo: self.options.repo.clone(),
            generated_at: Utc::now(),
            docs_dir: self.options.docs_dir.clone(),
            total_docs: results.len(),
            results,
            skipped_files: scan.skipped.into_iter().map(Into::into).collect(),
            errors,
        })
    }

    async fn process_bounded(
        &self,
        group: DocGroup,
        deadline: Option<Instant>,
        mut shutdown: watch::Receiver<bool>,
    ) -> DocOutcome {
        let started = std::time::Instant::now();
        if *shutdown.borrow() {
            return self.failure(&group, CANCELLED.to_string(), "cancelled", started);
        }

        let cancelled = async move {
            if shutdown.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let work = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.process_doc(&group))
                    .await
                    .map_err(|_| ()),
                None => Ok(self.process_doc(&group).await),
            }
        };

        tokio::select! {
            result = work => match result {
                Ok(Ok(report)) => {
                    metrics::DOCS_PROCESSED_TOTAL.with_label_values(&["success"]).inc();
                    metrics::DOC_DURATION
                        .with_label_values(&["success"])
                        .observe(started.elapsed().as_secs_f64());
                    DocOutcome::Done(report)
                }
                Ok(Err(err)) => {
                    warn!(doc_id = %group.doc_id, error = ?err, "failed to aggregate doc");
                    self.failure(&group, format!("{err:#}"), "error", started)
                }
                Err(()) => {
                    warn!(doc_id = %group.doc_id, "job deadline exceeded");
                    self.failure(&group, DEADLINE_EXCEEDED.to_string(), "timeout", started)
                }
            },
            _ = cancelled => {
                warn!(doc_id = %group.doc_id, "doc aggregation cancelled");
                self.failure(&group, CANCELLED.to_string(), "cancelled", started)
            }
        }
    }

    fn failure(
        &self,
        group: &DocGroup,
        message: String,
        outcome: &str,
        started: std::time::Instant,
    ) -> DocOutcome {
        metrics::DOCS_PROCESSED_TOTAL.with_label_values(&[outcome]).inc();
        metrics::DOC_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
        DocOutcome::Failed(DocReport::failed(
            &group.doc_id,
            group.primary_path().map(str::to_string),
            group.title.clone(),
            group.paths.clone(),
            message,
        ))
    }

    #[instrument(skip(self, group), fields(doc_id = %group.doc_id))]
    async fn process_doc(&self, group: &DocGroup) -> Result<DocReport> {
        let _active = ActiveDocGuard::new();

        let recorded = self
            .repos
            .docs()
            .list_paths(&group.doc_id)
            .await
            .context("loading recorded paths")?;
        let paths = union_paths(&group.paths, &recorded);

        let mut fetched = Vec::new();
        for path in &paths {
            let commits = self
                .source
                .list_commits(path)
                .await
                .with_context(|| format!("fetching commits for {path}"))?;
            fetched.extend(commits);
        }
        let commits = dedup_commits(fetched);

        let stored: HashMap<i64, Watermark> = self
            .repos
            .contributors()
            .list_for_doc(&group.doc_id)
            .await
            .context("loading stored contributors")?
            .into_iter()
            .map(|row| {
                (
                    row.github_id,
                    Watermark {
                        contributions: i64::from(row.contributions),
                        last_contributed_at: row.last_contributed_at,
                    },
                )
            })
            .collect();
        let outcome = merge_incremental(&commits, &stored);
        metrics::COMMITS_SKIPPED_TOTAL.inc_by(outcome.skipped_commits as u64);

        let contributors = outcome
            .contributors
            .iter()
            .map(|total| ContributorUpsert {
                github_id: total.github_id,
                login: total.login.clone(),
                avatar_url: total.avatar_url.clone(),
                html_url: total.html_url.clone(),
                contributions: i32::try_from(total.contributions).unwrap_or(i32::MAX),
                last_contributed_at: total.last_contributed_at,
            })
            .collect();
        let doc = self
            .repos
            .docs()
            .apply_update(DocUpdate {
                doc_id: group.doc_id.clone(),
                path_current: group.primary_path().map(str::to_string),
                title: group.title.clone(),
                paths: paths.clone(),
                contributors,
            })
            .await
            .context("writing contributor ledger")?;

        let rows = self
            .repos
            .contributors()
            .list_for_doc(&group.doc_id)
            .await
            .context("reloading contributors")?;
        let delta: i64 = outcome.contributors.iter().map(|total| total.delta).sum();
        info!(
            paths = paths.len(),
            commits = commits.len(),
            skipped = outcome.skipped_commits,
            delta,
            "aggregated doc"
        );

        Ok(DocReport {
            doc_id: group.doc_id.clone(),
            path: group.primary_path().map(str::to_string),
            title: group.title.clone(),
            paths,
            total_commits: commits.len(),
            skipped_commits: outcome.skipped_commits,
            contributor_stats: doc.stats().context("decoding contributor snapshot")?,
            contributors: rows.into_iter().map(ContributorReport::from).collect(),
            last_commit_at: newest_timestamp(&commits),
            error: None,
        })
    }
}
