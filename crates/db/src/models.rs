use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::errors::{DbError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocRow {
    pub id: String,
    pub path_current: Option<String>,
    pub title: Option<String>,
    /// Denormalized `{github_id: contributions}` for authors with a positive count.
    pub contributor_stats: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocRow {
    pub fn stats(&self) -> Result<BTreeMap<String, i64>> {
        serde_json::from_value(self.contributor_stats.clone()).map_err(DbError::Snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocContributorRow {
    pub doc_id: String,
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub contributions: i32,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

/// Absolute post-merge values for one (doc, author) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContributorUpsert {
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub contributions: i32,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

/// Everything written for one document in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct DocUpdate {
    pub doc_id: String,
    pub path_current: Option<String>,
    pub title: Option<String>,
    pub paths: Vec<String>,
    pub contributors: Vec<ContributorUpsert>,
}

pub fn snapshot_from_rows(rows: &[DocContributorRow]) -> BTreeMap<String, i64> {
    rows.iter()
        .filter(|row| row.contributions > 0)
        .map(|row| (row.github_id.to_string(), i64::from(row.contributions)))
        .collect()
}
