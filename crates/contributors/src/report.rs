use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use db::DocContributorRow;
use serde::{Deserialize, Serialize};

use crate::scan::SkippedFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorReport {
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub contributions: i64,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

impl From<DocContributorRow> for ContributorReport {
    fn from(row: DocContributorRow) -> Self {
        Self {
            github_id: row.github_id,
            login: row.login,
            avatar_url: row.avatar_url,
            html_url: row.html_url,
            contributions: i64::from(row.contributions),
            last_contributed_at: row.last_contributed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocReport {
    pub doc_id: String,
    pub path: Option<String>,
    pub title: Option<String>,
    pub paths: Vec<String>,
    pub total_commits: usize,
    pub skipped_commits: usize,
    pub contributor_stats: BTreeMap<String, i64>,
    pub contributors: Vec<ContributorReport>,
    pub last_commit_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocReport {
    pub fn failed(
        doc_id: &str,
        path: Option<String>,
        title: Option<String>,
        paths: Vec<String>,
        error: String,
    ) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            path,
            title,
            paths,
            total_commits: 0,
            skipped_commits: 0,
            contributor_stats: BTreeMap::new(),
            contributors: Vec::new(),
            last_commit_at: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFileReport {
    pub path: String,
    pub reason: String,
}

impl From<SkippedFile> for SkippedFileReport {
    fn from(file: SkippedFile) -> Self {
        Self {
            path: file.path,
            reason: file.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocError {
    pub doc_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub repo: String,
    pub generated_at: DateTime<Utc>,
    pub docs_dir: String,
    pub total_docs: usize,
    pub results: Vec<DocReport>,
    pub skipped_files: Vec<SkippedFileReport>,
    pub errors: Vec<DocError>,
}

impl BackfillReport {
    pub fn failed_docs(&self) -> usize {
        self.errors.len()
    }
}

/// Writes the report as pretty JSON, creating parent directories.
pub async fn write_report(path: &Path, report: &BackfillReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut body = serde_json::to_vec_pretty(report).context("encoding report")?;
    body.push(b'\n');
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
