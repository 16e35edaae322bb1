use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use portal::{
    auth::jwt::JwtService, config::AppConfig, create_router, db, state::AppState,
    storage::FsStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        storage_root = %config.storage_root,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let storage = Arc::new(FsStorage::new(config.storage_root.clone()));
    let jwt = JwtService::from_config(&config)?;
    let bind_addr = format!("{}:{}", config.server_host, config.server_port);

    let state = AppState::new(pool, config, storage, jwt);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app).await?;
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
