use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_OWNER: &str = "InvolutionHell";
const DEFAULT_REPO: &str = "involutionhell.github.io";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub discussions: DiscussionsConfig,
    #[serde(default)]
    pub contributors: ContributorsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(".")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/default")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/local")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Database URL from the `database` section, falling back to `DATABASE_URL`.
    pub fn database_url(&self) -> Option<String> {
        self.database
            .as_ref()
            .map(|db| db.url.clone())
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn database_max_connections(&self) -> u32 {
        self.database
            .as_ref()
            .map(|db| db.max_connections)
            .unwrap_or_else(DatabaseConfig::default_max_connections)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub test_admin_url: Option<String>,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "GithubConfig::default_user_agent")]
    pub user_agent: String,
    #[serde(default = "GithubConfig::default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "GithubConfig::default_api_url")]
    pub api_url: String,
    #[serde(default = "GithubConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "GithubConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "GithubConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "GithubConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "GithubConfig::default_jitter_frac")]
    pub jitter_frac: f32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            user_agent: Self::default_user_agent(),
            graphql_url: Self::default_graphql_url(),
            api_url: Self::default_api_url(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            max_attempts: Self::default_max_attempts(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
            jitter_frac: Self::default_jitter_frac(),
        }
    }
}

impl GithubConfig {
    fn default_user_agent() -> String {
        "docs-community-agent".to_string()
    }

    fn default_graphql_url() -> String {
        "https://api.github.com/graphql".to_string()
    }

    fn default_api_url() -> String {
        "https://api.github.com/".to_string()
    }

    const fn default_request_timeout_secs() -> u64 {
        30
    }

    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_backoff_base_ms() -> u64 {
        500
    }

    const fn default_backoff_max_ms() -> u64 {
        10_000
    }

    const fn default_jitter_frac() -> f32 {
        0.2
    }

    /// Server token: explicit configuration first, then `GITHUB_TOKEN`, then `GH_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .or_else(|| std::env::var("GH_TOKEN").ok())
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionsConfig {
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default = "DiscussionsConfig::default_category_name")]
    pub category_name: String,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default = "DiscussionsConfig::default_comment_page_size")]
    pub comment_page_size: u32,
    #[serde(default = "DiscussionsConfig::default_reply_page_size")]
    pub reply_page_size: u32,
}

impl Default for DiscussionsConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            repo: default_repo(),
            category_name: Self::default_category_name(),
            repository_id: None,
            category_id: None,
            comment_page_size: Self::default_comment_page_size(),
            reply_page_size: Self::default_reply_page_size(),
        }
    }
}

impl DiscussionsConfig {
    fn default_category_name() -> String {
        "Comments".to_string()
    }

    const fn default_comment_page_size() -> u32 {
        25
    }

    const fn default_reply_page_size() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributorsConfig {
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default = "ContributorsConfig::default_repo_root")]
    pub repo_root: String,
    #[serde(default = "ContributorsConfig::default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "ContributorsConfig::default_output")]
    pub output: String,
    #[serde(default = "ContributorsConfig::default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub sync_db: bool,
    #[serde(default = "ContributorsConfig::default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "ContributorsConfig::default_job_deadline_secs")]
    pub job_deadline_secs: u64,
}

impl Default for ContributorsConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            repo: default_repo(),
            repo_root: Self::default_repo_root(),
            docs_dir: Self::default_docs_dir(),
            output: Self::default_output(),
            per_page: Self::default_per_page(),
            sync_db: false,
            concurrency: Self::default_concurrency(),
            job_deadline_secs: Self::default_job_deadline_secs(),
        }
    }
}

impl ContributorsConfig {
    fn default_repo_root() -> String {
        ".".to_string()
    }

    fn default_docs_dir() -> String {
        "app/docs".to_string()
    }

    fn default_output() -> String {
        "tmp/doc-contributors.json".to_string()
    }

    const fn default_per_page() -> u32 {
        100
    }

    const fn default_concurrency() -> usize {
        1
    }

    const fn default_job_deadline_secs() -> u64 {
        3600
    }

    /// GitHub caps `per_page` at 100.
    pub fn effective_per_page(&self) -> u32 {
        self.per_page.clamp(1, 100)
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "ApiConfig::default_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

impl ApiConfig {
    fn default_bind() -> String {
        "0.0.0.0:8080".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "ObservabilityConfig::default_metrics_path")]
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_path: Self::default_metrics_path(),
        }
    }
}

impl ObservabilityConfig {
    fn default_metrics_path() -> String {
        "/metrics".to_string()
    }
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_repo() -> String {
    DEFAULT_REPO.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(raw: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .expect("config parses")
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = from_toml("");
        assert!(config.database.is_none());
        assert_eq!(config.discussions.category_name, "Comments");
        assert_eq!(config.discussions.comment_page_size, 25);
        assert_eq!(config.discussions.reply_page_size, 10);
        assert_eq!(config.contributors.docs_dir, "app/docs");
        assert_eq!(config.contributors.output, "tmp/doc-contributors.json");
        assert_eq!(config.contributors.effective_concurrency(), 1);
        assert_eq!(config.observability.metrics_path, "/metrics");
    }

    #[test]
    fn per_page_is_clamped_to_github_limits() {
        let config = from_toml(
            r#"
            [contributors]
            per_page = 500
            concurrency = 0
            "#,
        );
        assert_eq!(config.contributors.effective_per_page(), 100);
        assert_eq!(config.contributors.effective_concurrency(), 1);

        let config = from_toml(
            r#"
            [contributors]
            per_page = 0
            "#,
        );
        assert_eq!(config.contributors.effective_per_page(), 1);
    }

    #[test]
    fn explicit_discussion_ids_are_read() {
        let config = from_toml(
            r#"
            [discussions]
            owner = "acme"
            repo = "docs"
            repository_id = "R_1"
            category_id = "DIC_1"
            "#,
        );
        assert_eq!(config.discussions.owner, "acme");
        assert_eq!(config.discussions.repository_id.as_deref(), Some("R_1"));
        assert_eq!(config.discussions.category_id.as_deref(), Some("DIC_1"));
    }
}
