use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::GithubConfig;
use http::{header, HeaderValue, Method, Request, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::backoff::exponential_jitter_backoff;
use crate::error::GithubError;
use crate::metrics;
use crate::model::{
    is_next_page, is_rate_limited, parse_rate_limit, parse_retry_after, status_class, CommitPage,
    CommitPayload,
};
use crate::transport::{HttpExec, ReqwestExecutor, TimeoutElapsed};

/// Reads are retried; mutations are sent exactly once so a lost response
/// never turns into a duplicate discussion or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Mutation,
}

impl RequestKind {
    fn label(self) -> &'static str {
        match self {
            RequestKind::Read => "read",
            RequestKind::Mutation => "mutation",
        }
    }
}

#[derive(Clone)]
pub struct GithubClientBuilder {
    http_exec: Option<Arc<dyn HttpExec>>,
    graphql_url: String,
    api_url: String,
    user_agent: String,
    request_timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    jitter_frac: f32,
}

impl Default for GithubClientBuilder {
    fn default() -> Self {
        Self::from_config(&GithubConfig::default())
    }
}

impl GithubClientBuilder {
    pub fn from_config(config: &GithubConfig) -> Self {
        Self {
            http_exec: None,
            graphql_url: config.graphql_url.clone(),
            api_url: config.api_url.clone(),
            user_agent: config.user_agent.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            jitter_frac: config.jitter_frac,
        }
    }

    pub fn http_exec(mut self, exec: Arc<dyn HttpExec>) -> Self {
        self.http_exec = Some(exec);
        self
    }

    pub fn graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = url.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration, jitter: f32) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self.jitter_frac = jitter;
        self
    }

    pub fn build(self) -> Result<GithubClient, GithubError> {
        let exec: Arc<dyn HttpExec> = match self.http_exec {
            Some(exec) => exec,
            None => Arc::new(
                ReqwestExecutor::new(&self.user_agent, self.request_timeout)
                    .map_err(|err| GithubError::Configuration(err.to_string()))?,
            ),
        };

        let mut api_url = self.api_url;
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        let api_base = Url::parse(&api_url).map_err(|err| {
            GithubError::Configuration(format!("invalid GitHub API url {api_url}: {err}"))
        })?;
        let graphql_url = Url::parse(&self.graphql_url).map_err(|err| {
            GithubError::Configuration(format!(
                "invalid GitHub GraphQL url {}: {err}",
                self.graphql_url
            ))
        })?;

        Ok(GithubClient {
            inner: Arc::new(Inner {
                exec,
                graphql_url,
                api_base,
                user_agent: self.user_agent,
                max_attempts: self.max_attempts,
                backoff_base: self.backoff_base,
                backoff_max: self.backoff_max,
                jitter: self.jitter_frac,
            }),
        })
    }
}

struct Inner {
    exec: Arc<dyn HttpExec>,
    graphql_url: Url,
    api_base: Url,
    user_agent: String,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    jitter: f32,
}

#[derive(Clone)]
pub struct GithubClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct GraphqlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

/// Rejects missing or blank tokens before any request is made.
pub fn ensure_token<'a>(token: Option<&'a str>, context: &str) -> Result<&'a str, GithubError> {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(GithubError::missing_token(context)),
    }
}

impl GithubClient {
    pub fn builder() -> GithubClientBuilder {
        GithubClientBuilder::default()
    }

    /// Posts a GraphQL document and deserializes its `data` member into `T`.
    #[instrument(skip(self, token, query, variables), fields(kind = kind.label()))]
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        token: &str,
        operation: &str,
        query: &str,
        variables: Value,
        kind: RequestKind,
    ) -> Result<T, GithubError> {
        let token = ensure_token(Some(token), operation)?;
        let payload = json!({
            "query": query,
            "variables": variables,
            "operationName": operation,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|err| GithubError::Validation(format!("encode {operation}: {err}")))?;
        let endpoint = format!("graphql {operation}");

        let response = self
            .send_with_retry("graphql", &endpoint, kind, || {
                let mut request = Request::builder()
                    .method(Method::POST)
                    .uri(self.inner.graphql_url.as_str())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.clone())
                    .map_err(|err| GithubError::Configuration(err.to_string()))?;
                self.apply_headers(&mut request, Some(token))?;
                Ok(request)
            })
            .await?;

        decode_graphql(operation, response.body())
    }

    /// Fetches one page of commit history for `path`.
    #[instrument(skip(self, token))]
    pub async fn commits_page(
        &self,
        token: Option<&str>,
        owner: &str,
        repo: &str,
        path: &str,
        page: u32,
        per_page: u32,
    ) -> Result<CommitPage, GithubError> {
        let mut url = self
            .inner
            .api_base
            .join(&format!("repos/{owner}/{repo}/commits"))
            .map_err(|err| GithubError::Configuration(format!("commits url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("per_page", &per_page.clamp(1, 100).to_string())
            .append_pair("page", &page.max(1).to_string());
        let endpoint = format!("commits {path}");
        let token = token.map(str::trim).filter(|token| !token.is_empty());

        let response = self
            .send_with_retry("rest", &endpoint, RequestKind::Read, || {
                let mut request = Request::builder()
                    .method(Method::GET)
                    .uri(url.as_str())
                    .header(header::ACCEPT, "application/vnd.github+json")
                    .body(Vec::new())
                    .map_err(|err| GithubError::Configuration(err.to_string()))?;
                self.apply_headers(&mut request, token)?;
                Ok(request)
            })
            .await?;

        let commits: Vec<CommitPayload> = serde_json::from_slice(response.body())
            .map_err(|err| GithubError::Validation(format!("unexpected {endpoint} payload: {err}")))?;
        let has_next = !commits.is_empty() && is_next_page(response.headers());
        debug!(path, page, count = commits.len(), has_next, "fetched commit page");
        Ok(CommitPage { commits, has_next })
    }

    fn apply_headers(
        &self,
        request: &mut Request<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<(), GithubError> {
        let headers = request.headers_mut();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.inner.user_agent)
                .map_err(|err| GithubError::Configuration(format!("user agent: {err}")))?,
        );
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| GithubError::Configuration("malformed GitHub token".into()))?,
            );
        }
        Ok(())
    }

    async fn send_with_retry<F>(
        &self,
        label: &'static str,
        endpoint: &str,
        kind: RequestKind,
        make_request: F,
    ) -> Result<Response<Vec<u8>>, GithubError>
    where
        F: Fn() -> Result<Request<Vec<u8>>, GithubError>,
    {
        let max_attempts = match kind {
            RequestKind::Read => self.inner.max_attempts,
            RequestKind::Mutation => 1,
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.send_once(label, endpoint, kind, make_request()?).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let (retry, wait, reason) = match &err {
                SendError::RetryAfter { wait, .. } => (true, Some(*wait), "retry_after"),
                SendError::Fatal(err) if err.is_retryable() => (true, None, "error"),
                SendError::Fatal(_) => (false, None, "fatal"),
            };
            if !retry || attempt >= max_attempts {
                return Err(err.into_github_error());
            }

            let backoff = wait.unwrap_or_else(|| {
                exponential_jitter_backoff(
                    self.inner.backoff_base,
                    attempt - 1,
                    self.inner.backoff_max,
                    self.inner.jitter,
                )
            });
            warn!(
                attempt,
                endpoint,
                error = %err.as_display(),
                wait_ms = backoff.as_millis() as u64,
                "GitHub request attempt failed"
            );
            metrics::RETRIES_TOTAL
                .with_label_values(&[label, reason])
                .inc();
            sleep(backoff).await;
        }
    }

    async fn send_once(
        &self,
        label: &'static str,
        endpoint: &str,
        kind: RequestKind,
        request: Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, SendError> {
        let start = Instant::now();
        let response = match self.inner.exec.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                metrics::REQUESTS_TOTAL
                    .with_label_values(&[label, kind.label(), "error"])
                    .inc();
                if err.downcast_ref::<TimeoutElapsed>().is_some() {
                    return Err(SendError::Fatal(GithubError::Timeout {
                        endpoint: endpoint.to_string(),
                    }));
                }
                return Err(SendError::Fatal(GithubError::Transport {
                    endpoint: endpoint.to_string(),
                    message: format!("{err:#}"),
                }));
            }
        };
        metrics::LATENCY
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());
        let status = response.status();
        metrics::REQUESTS_TOTAL
            .with_label_values(&[label, kind.label(), status_class(status)])
            .inc();

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers();
        let rate = parse_rate_limit(headers);
        let request_id = headers
            .get("x-github-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        if is_rate_limited(status, headers) {
            metrics::RATE_LIMITED_TOTAL
                .with_label_values(&[label])
                .inc();
            let limited = GithubError::RateLimited {
                endpoint: endpoint.to_string(),
                reset: rate.as_ref().and_then(|r| r.reset),
            };
            warn!(
                status = %status,
                endpoint,
                github_request_id = %request_id,
                rate_limit_limit = rate.as_ref().and_then(|r| r.limit),
                rate_limit_remaining = rate.as_ref().and_then(|r| r.remaining),
                "GitHub rate limit response"
            );
            // Short Retry-After windows are worth waiting out; anything longer
            // surfaces the reset time to the caller.
            return match parse_retry_after(headers) {
                Some(advice) if advice.wait <= self.inner.backoff_max => Err(SendError::RetryAfter {
                    wait: advice.wait,
                    error: limited,
                }),
                _ => Err(SendError::Fatal(limited)),
            };
        }

        let body = String::from_utf8_lossy(response.body()).into_owned();
        let upstream = GithubError::Upstream {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
            body,
        };
        warn!(
            status = %status,
            endpoint,
            github_request_id = %request_id,
            "GitHub returned error response"
        );
        if status.is_server_error() {
            if let Some(advice) = parse_retry_after(headers) {
                if advice.wait <= self.inner.backoff_max {
                    return Err(SendError::RetryAfter {
                        wait: advice.wait,
                        error: upstream,
                    });
                }
            }
        }
        Err(SendError::Fatal(upstream))
    }
}

enum SendError {
    RetryAfter { wait: Duration, error: GithubError },
    Fatal(GithubError),
}

impl SendError {
    fn into_github_error(self) -> GithubError {
        match self {
            SendError::RetryAfter { error, .. } | SendError::Fatal(error) => error,
        }
    }

    fn as_display(&self) -> &GithubError {
        match self {
            SendError::RetryAfter { error, .. } | SendError::Fatal(error) => error,
        }
    }
}

fn decode_graphql<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T, GithubError> {
    let envelope: GraphqlEnvelope = serde_json::from_slice(body).map_err(|err| {
        GithubError::Validation(format!("GitHub returned a non-JSON response for {operation}: {err}"))
    })?;

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        let message = errors
            .first()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("GitHub error")
            .to_string();
        let not_found = errors
            .iter()
            .any(|e| e.get("type").and_then(Value::as_str) == Some("NOT_FOUND"));
        if not_found {
            return Err(GithubError::NotFound(message));
        }
        return Err(GithubError::Graphql {
            message,
            errors: Value::Array(errors),
        });
    }

    let data = match envelope.data {
        Some(Value::Null) | None => {
            return Err(GithubError::Validation("Empty GitHub response".to_string()))
        }
        Some(data) => data,
    };
    serde_json::from_value(data)
        .map_err(|err| GithubError::Validation(format!("unexpected {operation} payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Viewer {
        login: String,
    }

    #[test]
    fn decode_reports_first_graphql_error() {
        let body = br#"{"data":null,"errors":[{"message":"boom"},{"message":"second"}]}"#;
        match decode_graphql::<Viewer>("Viewer", body) {
            Err(GithubError::Graphql { message, errors }) => {
                assert_eq!(message, "boom");
                assert_eq!(errors.as_array().map(Vec::len), Some(2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_maps_not_found_type() {
        let body = br#"{"data":{"node":null},"errors":[{"type":"NOT_FOUND","message":"Could not resolve"}]}"#;
        assert!(matches!(
            decode_graphql::<Value>("Node", body),
            Err(GithubError::NotFound(_))
        ));
    }

    #[test]
    fn decode_requires_data() {
        assert!(matches!(
            decode_graphql::<Viewer>("Viewer", br#"{}"#),
            Err(GithubError::Validation(message)) if message == "Empty GitHub response"
        ));
        assert!(matches!(
            decode_graphql::<Viewer>("Viewer", br#"{"data":{"login":42}}"#),
            Err(GithubError::Validation(_))
        ));
        let viewer: Viewer =
            decode_graphql("Viewer", br#"{"data":{"login":"octocat"}}"#).expect("viewer");
        assert_eq!(viewer.login, "octocat");
    }

    #[test]
    fn ensure_token_rejects_blank() {
        assert!(ensure_token(None, "search").is_err());
        assert!(ensure_token(Some("  "), "search").is_err());
        assert_eq!(ensure_token(Some(" t "), "search").ok(), Some("t"));
        let err = ensure_token(None, "addDiscussionComment").unwrap_err();
        assert_eq!(err.to_string(), "GitHub token missing for addDiscussionComment");
    }
}
