use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use db::errors::{DbError, Result};
use db::{
    snapshot_from_rows, ContributorRepository, DocContributorRow, DocRepository, DocRow,
    DocUpdate, Repositories,
};

/// Process-local ledger with the same merge rules as the Postgres store.
/// Used when the job runs without database sync.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    docs: BTreeMap<String, DocRow>,
    paths: BTreeMap<String, BTreeSet<String>>,
    contributors: BTreeMap<String, BTreeMap<i64, DocContributorRow>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Repositories for MemoryLedger {
    fn docs(&self) -> &dyn DocRepository {
        self
    }

    fn contributors(&self) -> &dyn ContributorRepository {
        self
    }
}

#[async_trait]
impl DocRepository for MemoryLedger {
    async fn get(&self, doc_id: &str) -> Result<Option<DocRow>> {
        Ok(self.lock().docs.get(doc_id).cloned())
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<DocRow>> {
        let state = self.lock();
        let current = state
            .docs
            .values()
            .filter(|doc| doc.path_current.as_deref() == Some(path))
            .max_by_key(|doc| doc.updated_at);
        if let Some(doc) = current {
            return Ok(Some(doc.clone()));
        }
        Ok(state
            .paths
            .iter()
            .filter(|(_, paths)| paths.contains(path))
            .filter_map(|(doc_id, _)| state.docs.get(doc_id))
            .max_by_key(|doc| doc.updated_at)
            .cloned())
    }

    async fn list_paths(&self, doc_id: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .paths
            .get(doc_id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_update(&self, update: DocUpdate) -> Result<DocRow> {
        let mut state = self.lock();
        let now = Utc::now();

        state
            .paths
            .entry(update.doc_id.clone())
            .or_default()
            .extend(update.paths.iter().cloned());

        let rows = state.contributors.entry(update.doc_id.clone()).or_default();
        for contributor in update.contributors {
            let row = rows
                .entry(contributor.github_id)
                .or_insert_with(|| DocContributorRow {
                    doc_id: update.doc_id.clone(),
                    github_id: contributor.github_id,
                    login: None,
                    avatar_url: None,
                    html_url: None,
                    contributions: 0,
                    last_contributed_at: None,
                });
            row.login = contributor.login.or(row.login.take());
            row.avatar_url = contributor.avatar_url.or(row.avatar_url.take());
            row.html_url = contributor.html_url.or(row.html_url.take());
            row.contributions = row.contributions.max(contributor.contributions);
            row.last_contributed_at = row.last_contributed_at.max(contributor.last_contributed_at);
        }
        let snapshot_rows: Vec<DocContributorRow> = rows.values().cloned().collect();
        let snapshot =
            serde_json::to_value(snapshot_from_rows(&snapshot_rows)).map_err(DbError::Snapshot)?;

        let doc = state
            .docs
            .entry(update.doc_id.clone())
            .or_insert_with(|| DocRow {
                id: update.doc_id.clone(),
                path_current: None,
                title: None,
                contributor_stats: serde_json::Value::Object(Default::default()),
                created_at: now,
                updated_at: now,
            });
        if update.path_current.is_some() {
            doc.path_current = update.path_current;
        }
        if update.title.is_some() {
            doc.title = update.title;
        }
        doc.contributor_stats = snapshot;
        doc.updated_at = now;
        Ok(doc.clone())
    }
}

#[async_trait]
impl ContributorRepository for MemoryLedger {
    async fn list_for_doc(&self, doc_id: &str) -> Result<Vec<DocContributorRow>> {
        let mut rows: Vec<DocContributorRow> = self
            .lock()
            .contributors
            .get(doc_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            b.contributions
                .cmp(&a.contributions)
                .then_with(|| match (a.last_contributed_at, b.last_contributed_at) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.github_id.cmp(&b.github_id))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use db::ContributorUpsert;

    fn upsert(github_id: i64, contributions: i32, hours: Option<i64>) -> ContributorUpsert {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ContributorUpsert {
            github_id,
            login: Some(format!("user{github_id}")),
            avatar_url: None,
            html_url: None,
            contributions,
            last_contributed_at: hours.map(|h| base + Duration::hours(h)),
        }
    }

    #[tokio::test]
    async fn stale_updates_never_lower_counts() {
        let ledger = MemoryLedger::new();
        ledger
            .apply_update(DocUpdate {
                doc_id: "doc".into(),
                path_current: Some("app/docs/a.md".into()),
                title: Some("A".into()),
                paths: vec!["app/docs/a.md".into()],
                contributors: vec![upsert(1, 5, Some(5)), upsert(2, 0, None)],
            })
            .await
            .unwrap();
        let doc = ledger
            .apply_update(DocUpdate {
                doc_id: "doc".into(),
                path_current: None,
                title: None,
                paths: vec!["app/docs/b.md".into()],
                contributors: vec![upsert(1, 3, Some(2))],
            })
            .await
            .unwrap();

        assert_eq!(doc.path_current.as_deref(), Some("app/docs/a.md"));
        assert_eq!(doc.title.as_deref(), Some("A"));
        let stats = doc.stats().unwrap();
        assert_eq!(stats.get("1"), Some(&5));
        assert!(!stats.contains_key("2"));

        let rows = ledger.list_for_doc("doc").await.unwrap();
        assert_eq!(rows[0].github_id, 1);
        assert_eq!(rows[0].contributions, 5);
        assert_eq!(rows[0].last_contributed_at.map(|t| t.timestamp() % 86_400), Some(5 * 3600));

        let paths = ledger.list_paths("doc").await.unwrap();
        assert_eq!(paths, vec!["app/docs/a.md", "app/docs/b.md"]);
        let found = ledger.find_by_path("app/docs/b.md").await.unwrap();
        assert_eq!(found.map(|d| d.id), Some("doc".to_string()));
        assert!(ledger.find_by_path("app/docs/none.md").await.unwrap().is_none());
    }
}
