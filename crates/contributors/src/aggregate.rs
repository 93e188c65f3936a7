use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::commits::CommitInfo;

/// What the ledger already knows about one author on one doc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
    pub contributions: i64,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorTotal {
    pub github_id: i64,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    /// Stored count plus `delta`.
    pub contributions: i64,
    pub delta: i64,
    pub last_contributed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// One entry per author seen in this run, ordered by github id.
    pub contributors: Vec<ContributorTotal>,
    /// Commits that could not be attributed to a GitHub account.
    pub skipped_commits: usize,
}

pub fn union_paths<'a, I, J>(scanned: I, recorded: J) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
    J: IntoIterator<Item = &'a String>,
{
    scanned
        .into_iter()
        .chain(recorded)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Keeps the first occurrence of every SHA.
pub fn dedup_commits(commits: impl IntoIterator<Item = CommitInfo>) -> Vec<CommitInfo> {
    let mut seen = HashSet::new();
    commits
        .into_iter()
        .filter(|commit| seen.insert(commit.sha.clone()))
        .collect()
}

/// Folds this run's commits into the stored per-author watermarks.
///
/// A timestamped commit counts when the author has no watermark yet or when it
/// is strictly newer than the watermark. Commits without a timestamp only count
/// for authors the ledger has never seen, since they cannot be ordered against
/// a watermark.
pub fn merge_incremental(
    commits: &[CommitInfo],
    stored: &HashMap<i64, Watermark>,
) -> MergeOutcome {
    let mut totals: BTreeMap<i64, ContributorTotal> = BTreeMap::new();
    let mut skipped_commits = 0usize;

    for commit in commits {
        let Some(author) = &commit.author else {
            skipped_commits += 1;
            continue;
        };

        let previous = stored.get(&author.github_id).copied();
        let entry = totals.entry(author.github_id).or_insert_with(|| {
            let base = previous.unwrap_or_default();
            ContributorTotal {
                github_id: author.github_id,
                login: None,
                avatar_url: None,
                html_url: None,
                contributions: base.contributions,
                delta: 0,
                last_contributed_at: base.last_contributed_at,
            }
        });
        if entry.login.is_none() {
            entry.login = author.login.clone();
        }
        if entry.avatar_url.is_none() {
            entry.avatar_url = author.avatar_url.clone();
        }
        if entry.html_url.is_none() {
            entry.html_url = author.html_url.clone();
        }

        let watermark = previous.and_then(|w| w.last_contributed_at);
        let counts = match (commit.timestamp, watermark) {
            (Some(ts), Some(mark)) => ts > mark,
            (Some(_), None) => true,
            (None, _) => previous.is_none(),
        };
        if counts {
            entry.delta += 1;
            entry.contributions += 1;
        }
        if let Some(ts) = commit.timestamp {
            entry.last_contributed_at = Some(match entry.last_contributed_at {
                Some(current) => current.max(ts),
                None => ts,
            });
        }
    }

    MergeOutcome {
        contributors: totals.into_values().collect(),
        skipped_commits,
    }
}

/// `{github_id: contributions}` for authors with a positive count.
pub fn contributor_snapshot(totals: impl IntoIterator<Item = (i64, i64)>) -> BTreeMap<String, i64> {
    totals
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(id, count)| (id.to_string(), count))
        .collect()
}

pub fn newest_timestamp(commits: &[CommitInfo]) -> Option<DateTime<Utc>> {
    commits.iter().filter_map(|commit| commit.timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::AuthorInfo;
    use chrono::{Duration, TimeZone};

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn commit(sha: &str, author: Option<i64>, ts: Option<DateTime<Utc>>) -> CommitInfo {
        CommitInfo {
            sha: sha.to_string(),
            author: author.map(|id| AuthorInfo {
                github_id: id,
                login: Some(format!("user{id}")),
                avatar_url: None,
                html_url: Some(format!("https://github.com/user{id}")),
            }),
            timestamp: ts,
        }
    }

    #[test]
    fn only_commits_after_the_watermark_count() {
        let t = at(10);
        let stored = HashMap::from([(
            7,
            Watermark {
                contributions: 5,
                last_contributed_at: Some(t),
            },
        )]);
        let commits = vec![
            commit("a", Some(7), Some(t - Duration::hours(1))),
            commit("b", Some(7), Some(t + Duration::hours(1))),
            commit("c", Some(7), Some(t + Duration::hours(2))),
        ];

        let outcome = merge_incremental(&commits, &stored);
        assert_eq!(outcome.contributors.len(), 1);
        let total = &outcome.contributors[0];
        assert_eq!(total.contributions, 7);
        assert_eq!(total.delta, 2);
        assert_eq!(total.last_contributed_at, Some(t + Duration::hours(2)));
    }

    #[test]
    fn commit_at_the_watermark_is_not_recounted() {
        let stored = HashMap::from([(
            1,
            Watermark {
                contributions: 1,
                last_contributed_at: Some(at(3)),
            },
        )]);
        let outcome = merge_incremental(&[commit("x", Some(1), Some(at(3)))], &stored);
        assert_eq!(outcome.contributors[0].contributions, 1);
        assert_eq!(outcome.contributors[0].delta, 0);
        assert_eq!(outcome.contributors[0].last_contributed_at, Some(at(3)));
    }

    #[test]
    fn authors_absent_from_the_run_are_not_emitted() {
        let stored = HashMap::from([
            (
                1,
                Watermark {
                    contributions: 4,
                    last_contributed_at: Some(at(1)),
                },
            ),
            (
                2,
                Watermark {
                    contributions: 9,
                    last_contributed_at: Some(at(1)),
                },
            ),
        ]);
        let outcome = merge_incremental(&[commit("n", Some(1), Some(at(2)))], &stored);
        assert_eq!(outcome.contributors.len(), 1);
        assert_eq!(outcome.contributors[0].github_id, 1);
        assert_eq!(outcome.contributors[0].contributions, 5);
    }

    #[test]
    fn anonymous_commits_are_skipped_and_counted() {
        let outcome = merge_incremental(
            &[
                commit("a", None, Some(at(1))),
                commit("b", Some(3), Some(at(2))),
                commit("c", None, None),
            ],
            &HashMap::new(),
        );
        assert_eq!(outcome.skipped_commits, 2);
        assert_eq!(outcome.contributors.len(), 1);
        assert_eq!(outcome.contributors[0].login.as_deref(), Some("user3"));
    }

    #[test]
    fn undated_commits_only_count_for_new_authors() {
        let stored = HashMap::from([(
            1,
            Watermark {
                contributions: 2,
                last_contributed_at: Some(at(1)),
            },
        )]);
        let outcome = merge_incremental(
            &[commit("a", Some(1), None), commit("b", Some(2), None)],
            &stored,
        );
        let by_id: HashMap<_, _> = outcome
            .contributors
            .iter()
            .map(|c| (c.github_id, c))
            .collect();
        assert_eq!(by_id[&1].contributions, 2);
        assert_eq!(by_id[&2].contributions, 1);
        assert_eq!(by_id[&2].last_contributed_at, None);
    }

    #[test]
    fn renamed_doc_counts_shared_commits_once() {
        let old_path = "app/docs/old.md".to_string();
        let new_path = "app/docs/new.md".to_string();
        let paths = union_paths([&new_path], [&old_path, &new_path]);
        assert_eq!(paths, vec![new_path.clone(), old_path.clone()]);

        let under_new = vec![
            commit("s2", Some(1), Some(at(2))),
            commit("s1", Some(1), Some(at(1))),
        ];
        let under_old = vec![
            commit("s1", Some(1), Some(at(1))),
            commit("s0", Some(2), Some(at(0))),
        ];
        let merged = dedup_commits(under_new.into_iter().chain(under_old));
        assert_eq!(merged.len(), 3);

        let outcome = merge_incremental(&merged, &HashMap::new());
        let counts: Vec<_> = outcome
            .contributors
            .iter()
            .map(|c| (c.github_id, c.contributions))
            .collect();
        assert_eq!(counts, vec![(1, 2), (2, 1)]);
        assert_eq!(newest_timestamp(&merged), Some(at(2)));
    }

    #[test]
    fn snapshot_drops_zero_counts() {
        let snapshot = contributor_snapshot([(1, 3), (2, 0), (3, 1)]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["1"], 3);
        assert!(!snapshot.contains_key("2"));
    }
}
