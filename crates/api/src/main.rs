use std::sync::Arc;

use anyhow::{Context, Result};
use api::lock::PgCreationLock;
use api::{build_router, ApiState};
use axum::Router;
use common::{config::AppConfig, logging};
use db::pg::PgDatabase;
use db::Repositories;
use discussions::{CreationLock, DiscussionService, KeyedMutexLock, MetadataCache};
use gh_client::GithubClientBuilder;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init_tracing("api", "info");

    let client = GithubClientBuilder::from_config(&config.github).build()?;
    let server_token = config.github.resolved_token();
    if server_token.is_none() {
        warn!("no GitHub server token configured; discussion routes will fail");
    }

    let (lock, repositories): (Arc<dyn CreationLock>, Option<Arc<dyn Repositories>>) =
        match config.database_url() {
            Some(url) => {
                let database = Arc::new(
                    PgDatabase::connect_with(&url, config.database_max_connections())
                        .await
                        .context("connecting to database")?,
                );
                let repositories: Arc<dyn Repositories> = database.clone();
                (Arc::new(PgCreationLock::new(database)), Some(repositories))
            }
            None => {
                warn!("DATABASE_URL not set; using in-process creation lock and no contributor ledger");
                (Arc::new(KeyedMutexLock::new()), None)
            }
        };

    let discussions = DiscussionService::new(
        client,
        config.discussions.clone(),
        server_token,
        Arc::new(MetadataCache::new()),
        lock,
    );
    let state = Arc::new(ApiState {
        discussions: Arc::new(discussions),
        repositories,
        docs_dir: config.contributors.docs_dir.clone(),
        metrics_path: config.observability.metrics_path.clone(),
    });
    let app: Router = build_router(state);

    let addr: std::net::SocketAddr = config.api.bind.parse()?;
    info!("api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    // Flush remaining spans (no-op if otel disabled)
    logging::shutdown_tracer_provider();
    Ok(())
}
