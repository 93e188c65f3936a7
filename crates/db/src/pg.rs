use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tokio::time::{sleep, Duration};
use tracing::{debug, instrument, warn};

use crate::errors::{DbError, Result};
use crate::models::{snapshot_from_rows, DocContributorRow, DocRow, DocUpdate};
use crate::repositories::{ContributorRepository, DocRepository, Repositories};

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(DbError::Migration)
}

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
    doc_repo: Arc<PgDocRepository>,
    contributor_repo: Arc<PgContributorRepository>,
}

impl PgDatabase {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 10).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        const MAX_ATTEMPTS: u32 = 5;
        const BASE_DELAY_MS: u64 = 500;

        let mut attempts = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(database_url)
                .await
            {
                Ok(pool) => {
                    run_migrations(&pool).await?;
                    return Ok(Self::from_pool(pool));
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(DbError::Query(err));
                    }

                    let exp = (attempts - 1).min(5);
                    let backoff = Duration::from_millis(BASE_DELAY_MS * (1u64 << exp));
                    warn!(
                        attempts,
                        error = %err,
                        wait_ms = backoff.as_millis(),
                        "database connection failed; retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let doc_repo = Arc::new(PgDocRepository { pool: pool.clone() });
        let contributor_repo = Arc::new(PgContributorRepository { pool: pool.clone() });

        Self {
            pool,
            doc_repo,
            contributor_repo,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Blocks until the transaction-scoped advisory lock for `key` is held.
    /// The lock is released when the guard is released or dropped.
    #[instrument(skip(self))]
    pub async fn advisory_lock(&self, key: &str) -> Result<AdvisoryLockGuard> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_id(key))
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        debug!(key, "advisory lock acquired");
        Ok(AdvisoryLockGuard { tx })
    }
}

impl Repositories for PgDatabase {
    fn docs(&self) -> &dyn DocRepository {
        &*self.doc_repo
    }

    fn contributors(&self) -> &dyn ContributorRepository {
        &*self.contributor_repo
    }
}

pub struct AdvisoryLockGuard {
    tx: Transaction<'static, Postgres>,
}

impl AdvisoryLockGuard {
    pub async fn release(self) -> Result<()> {
        self.tx.commit().await.map_err(DbError::Query)
    }
}

/// Stable 64-bit lock id: the first eight bytes of SHA-256(key).
pub fn advisory_lock_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[derive(Clone)]
struct PgDocRepository {
    pool: PgPool,
}

#[async_trait]
impl DocRepository for PgDocRepository {
    async fn get(&self, doc_id: &str) -> Result<Option<DocRow>> {
        sqlx::query_as::<_, DocRow>(
            r#"
            SELECT id, path_current, title, contributor_stats, created_at, updated_at
            FROM docs
            WHERE id = $1
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<DocRow>> {
        sqlx::query_as::<_, DocRow>(
            r#"
            SELECT d.id, d.path_current, d.title, d.contributor_stats, d.created_at, d.updated_at
            FROM docs d
            WHERE d.path_current = $1
               OR EXISTS (SELECT 1 FROM doc_paths p WHERE p.doc_id = d.id AND p.path = $1)
            ORDER BY (d.path_current = $1) DESC NULLS LAST, d.updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    async fn list_paths(&self, doc_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT path
            FROM doc_paths
            WHERE doc_id = $1
            ORDER BY path
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    #[instrument(skip(self, update), fields(doc_id = %update.doc_id, contributors = update.contributors.len()))]
    async fn apply_update(&self, update: DocUpdate) -> Result<DocRow> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        sqlx::query(
            r#"
            INSERT INTO docs (id, path_current, title)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET path_current = COALESCE(EXCLUDED.path_current, docs.path_current),
                    title = COALESCE(EXCLUDED.title, docs.title),
                    updated_at = now()
            "#,
        )
        .bind(&update.doc_id)
        .bind(&update.path_current)
        .bind(&update.title)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        for path in &update.paths {
            sqlx::query(
                r#"
                INSERT INTO doc_paths (doc_id, path)
                VALUES ($1, $2)
                ON CONFLICT (doc_id, path) DO NOTHING
                "#,
            )
            .bind(&update.doc_id)
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        }

        // GREATEST keeps counts and watermarks monotonic even if two runs race.
        for contributor in &update.contributors {
            sqlx::query(
                r#"
                INSERT INTO doc_contributors (
                    doc_id, github_id, login, avatar_url, html_url, contributions, last_contributed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (doc_id, github_id) DO UPDATE
                    SET login = COALESCE(EXCLUDED.login, doc_contributors.login),
                        avatar_url = COALESCE(EXCLUDED.avatar_url, doc_contributors.avatar_url),
                        html_url = COALESCE(EXCLUDED.html_url, doc_contributors.html_url),
                        contributions = GREATEST(doc_contributors.contributions, EXCLUDED.contributions),
                        last_contributed_at = GREATEST(doc_contributors.last_contributed_at, EXCLUDED.last_contributed_at),
                        updated_at = now()
                "#,
            )
            .bind(&update.doc_id)
            .bind(contributor.github_id)
            .bind(&contributor.login)
            .bind(&contributor.avatar_url)
            .bind(&contributor.html_url)
            .bind(contributor.contributions)
            .bind(contributor.last_contributed_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        }

        let rows = sqlx::query_as::<_, DocContributorRow>(
            r#"
            SELECT doc_id, github_id, login, avatar_url, html_url, contributions, last_contributed_at
            FROM doc_contributors
            WHERE doc_id = $1
            "#,
        )
        .bind(&update.doc_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::Query)?;
        let snapshot =
            serde_json::to_value(snapshot_from_rows(&rows)).map_err(DbError::Snapshot)?;

        let doc = sqlx::query_as::<_, DocRow>(
            r#"
            UPDATE docs
            SET contributor_stats = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING id, path_current, title, contributor_stats, created_at, updated_at
            "#,
        )
        .bind(&update.doc_id)
        .bind(snapshot)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)?;
        Ok(doc)
    }
}

#[derive(Clone)]
struct PgContributorRepository {
    pool: PgPool,
}

#[async_trait]
impl ContributorRepository for PgContributorRepository {
    async fn list_for_doc(&self, doc_id: &str) -> Result<Vec<DocContributorRow>> {
        sqlx::query_as::<_, DocContributorRow>(
            r#"
            SELECT doc_id, github_id, login, avatar_url, html_url, contributions, last_contributed_at
            FROM doc_contributors
            WHERE doc_id = $1
            ORDER BY contributions DESC, last_contributed_at DESC NULLS LAST, github_id
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }
}
