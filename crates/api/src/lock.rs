use std::sync::Arc;

use async_trait::async_trait;
use db::pg::{AdvisoryLockGuard, PgDatabase};
use discussions::{CreationGuard, CreationLock, DiscussionError, HeldLock};
use tracing::warn;

/// Creation lock shared by every API replica through a Postgres advisory lock.
pub struct PgCreationLock {
    database: Arc<PgDatabase>,
}

impl PgCreationLock {
    pub fn new(database: Arc<PgDatabase>) -> Self {
        Self { database }
    }
}

struct HeldAdvisoryLock(AdvisoryLockGuard);

#[async_trait]
impl HeldLock for HeldAdvisoryLock {
    async fn release(self: Box<Self>) {
        if let Err(err) = self.0.release().await {
            warn!(error = %err, "failed to release discussion creation lock");
        }
    }
}

#[async_trait]
impl CreationLock for PgCreationLock {
    async fn acquire(&self, key: &str) -> discussions::error::Result<CreationGuard> {
        let guard = self
            .database
            .advisory_lock(&format!("discussion:{key}"))
            .await
            .map_err(|err| DiscussionError::Lock(err.to_string()))?;
        Ok(CreationGuard::new(Box::new(HeldAdvisoryLock(guard))))
    }
}
