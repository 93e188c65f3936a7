use std::sync::{Arc, RwLock};

use common::config::DiscussionsConfig;
use gh_client::{GithubClient, GithubError, RequestKind};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::queries::{REPOSITORY_METADATA, REPOSITORY_METADATA_QUERY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub repository_id: String,
    pub category_id: String,
    pub category_name: String,
}

/// Single-slot memo for the resolved repository metadata. There is no TTL;
/// a category rename needs a restart or an explicit [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct MetadataCache {
    slot: RwLock<Option<Arc<RepositoryMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<RepositoryMetadata>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, metadata: RepositoryMetadata) -> Arc<RepositoryMetadata> {
        let metadata = Arc::new(metadata);
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(metadata.clone());
        metadata
    }

    pub fn invalidate(&self) {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    id: String,
    discussion_categories: CategoryConnection,
}

#[derive(Debug, Deserialize)]
struct CategoryConnection {
    nodes: Vec<CategoryNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CategoryNode {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
}

/// Case-insensitive match on name or slug, else the first category.
pub(crate) fn select_category<'a>(nodes: &'a [CategoryNode], target: &str) -> Option<&'a CategoryNode> {
    let target = target.to_lowercase();
    nodes
        .iter()
        .find(|node| {
            node.name.as_deref().map(str::to_lowercase).as_deref() == Some(target.as_str())
                || node.slug.as_deref().map(str::to_lowercase).as_deref() == Some(target.as_str())
        })
        .or_else(|| nodes.first())
}

pub struct MetadataResolver {
    client: GithubClient,
    config: DiscussionsConfig,
    cache: Arc<MetadataCache>,
}

impl MetadataResolver {
    pub fn new(client: GithubClient, config: DiscussionsConfig, cache: Arc<MetadataCache>) -> Self {
        Self {
            client,
            config,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    #[instrument(skip(self, token), fields(owner = %self.config.owner, repo = %self.config.repo))]
    pub async fn resolve(&self, token: &str) -> Result<Arc<RepositoryMetadata>> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }

        if let (Some(repository_id), Some(category_id)) = (
            self.config.repository_id.as_deref().filter(|id| !id.is_empty()),
            self.config.category_id.as_deref().filter(|id| !id.is_empty()),
        ) {
            debug!("using configured repository and category ids");
            return Ok(self.cache.set(RepositoryMetadata {
                repository_id: repository_id.to_string(),
                category_id: category_id.to_string(),
                category_name: self.config.category_name.clone(),
            }));
        }

        let data: MetadataData = self
            .client
            .graphql(
                token,
                REPOSITORY_METADATA,
                REPOSITORY_METADATA_QUERY,
                json!({ "owner": self.config.owner, "repo": self.config.repo }),
                RequestKind::Read,
            )
            .await?;

        let repository = data
            .repository
            .ok_or_else(|| GithubError::NotFound("GitHub repository not found".to_string()))?;
        let category = select_category(
            &repository.discussion_categories.nodes,
            &self.config.category_name,
        )
        .ok_or_else(|| {
            GithubError::Configuration(format!(
                "Discussion category \"{}\" not found in repository",
                self.config.category_name
            ))
        })?;

        debug!(category_id = %category.id, "resolved discussion category");
        Ok(self.cache.set(RepositoryMetadata {
            repository_id: repository.id,
            category_id: category.id.clone(),
            category_name: category.name.clone().unwrap_or_default(),
        }))
    }
}
