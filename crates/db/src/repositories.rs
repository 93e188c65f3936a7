use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{DocContributorRow, DocRow, DocUpdate};

#[async_trait]
pub trait DocRepository: Send + Sync {
    async fn get(&self, doc_id: &str) -> Result<Option<DocRow>>;
    /// Resolves a doc by its current path or any path it has ever occupied.
    async fn find_by_path(&self, path: &str) -> Result<Option<DocRow>>;
    async fn list_paths(&self, doc_id: &str) -> Result<Vec<String>>;
    /// Upserts the doc row, records paths, upserts contributors and refreshes
    /// the contributor snapshot atomically.
    async fn apply_update(&self, update: DocUpdate) -> Result<DocRow>;
}

#[async_trait]
pub trait ContributorRepository: Send + Sync {
    async fn list_for_doc(&self, doc_id: &str) -> Result<Vec<DocContributorRow>>;
}

pub trait Repositories: Send + Sync {
    fn docs(&self) -> &dyn DocRepository;
    fn contributors(&self) -> &dyn ContributorRepository;
}
