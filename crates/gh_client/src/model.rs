use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{header, HeaderMap, StatusCode};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct RateLimitUpdate {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset: Option<DateTime<Utc>>,
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
}

pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitUpdate> {
    let update = RateLimitUpdate {
        limit: header_i64(headers, "x-ratelimit-limit"),
        remaining: header_i64(headers, "x-ratelimit-remaining"),
        reset: header_i64(headers, "x-ratelimit-reset")
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    };
    if update.limit.is_none() && update.remaining.is_none() && update.reset.is_none() {
        None
    } else {
        Some(update)
    }
}

/// 429, or 403 carrying rate-limit reset information.
pub fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && headers.contains_key("x-ratelimit-reset"))
}

#[derive(Debug, Clone)]
pub struct RetryAdvice {
    pub wait: Duration,
}

pub fn parse_retry_after(headers: &HeaderMap) -> Option<RetryAdvice> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(RetryAdvice {
            wait: Duration::from_secs(seconds),
        });
    }
    let date = httpdate::parse_http_date(value).ok()?;
    let wait = date
        .duration_since(std::time::SystemTime::now())
        .unwrap_or_default();
    Some(RetryAdvice { wait })
}

/// True when a `Link` header advertises a `rel="next"` page.
pub fn is_next_page(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|part| part.contains("rel=\"next\""))
}

pub fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// One element of `GET /repos/{owner}/{repo}/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitPayload {
    pub sha: String,
    /// `null` when the commit email is not linked to a GitHub account.
    #[serde(default)]
    pub author: Option<CommitAuthor>,
    #[serde(default)]
    pub commit: CommitMeta,
}

impl CommitPayload {
    /// Author date, falling back to the committer date.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.commit
            .author
            .as_ref()
            .and_then(|sig| sig.date)
            .or_else(|| self.commit.committer.as_ref().and_then(|sig| sig.date))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitMeta {
    #[serde(default)]
    pub author: Option<CommitSignature>,
    #[serde(default)]
    pub committer: Option<CommitSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitSignature {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    pub commits: Vec<CommitPayload>,
    pub has_next: bool,
}
