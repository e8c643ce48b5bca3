use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use labinsight::analysis::HttpAnalyzer;
use labinsight::auth::jwt::JwtService;
use labinsight::config::AppConfig;
use labinsight::db;
use labinsight::routes::create_router;
use labinsight::state::AppState;
use labinsight::storage::LocalStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        ai_service_url = %config.ai_service_url,
        upload_dir = %config.upload_dir.display(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    {
        let mut conn = pool.get().context("failed to get database connection")?;
        let applied = db::run_migrations(&mut conn)?;
        tracing::info!(applied, "database migrations up to date");
    }

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;
    let storage = Arc::new(LocalStorage::new(config.upload_dir.clone()));
    let analyzer = Arc::new(HttpAnalyzer::new(
        &config.ai_service_url,
        Duration::from_secs(config.ai_service_timeout_seconds),
    )?);
    let jwt = JwtService::from_config(&config)?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;
    let state = AppState::new(pool, config, storage, analyzer, jwt);
    let router = create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
