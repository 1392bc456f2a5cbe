use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use followup_engine::api::{self, AppState};
use followup_engine::composer_client::HttpComposerClient;
use followup_engine::crm_client::HttpCrmClient;
use followup_engine::metrics::Metrics;
use followup_engine::store::postgres::{build_pool, PostgresStore};
use followup_engine::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "followup_engine=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("followup engine starting up");
    info!(
        port = config.port,
        draft_collection = %config.draft_collection,
        followup_collection = %config.followup_collection,
        "configuration loaded"
    );

    // Run database migrations first.
    {
        use diesel::prelude::*;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
        info!("database migrations applied");
    }

    let pool = build_pool(&config.database_url)?;
    let store = Arc::new(PostgresStore::new(pool));

    let metrics = Arc::new(Metrics::new());

    let crm_url = config.crm_url.clone().unwrap_or_default();
    let crm_secret = config.crm_secret.clone().unwrap_or_default();
    let crm = Arc::new(HttpCrmClient::new(crm_url, crm_secret, metrics.clone()));

    let composer = Arc::new(HttpComposerClient::new(config.mail_writer_url.clone(), metrics.clone()));

    let state = Arc::new(AppState::new(store, crm, composer, metrics));
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
