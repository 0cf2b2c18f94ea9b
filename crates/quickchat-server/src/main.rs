use std::sync::Arc;

use tracing::info;

use quickchat_api::media::DiskMediaStore;
use quickchat_api::state::AppStateInner;
use quickchat_gateway::PresenceTracker;
use quickchat_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quickchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = quickchat_db::Database::open(&config.db_path)?;
    let media = Arc::new(DiskMediaStore::new(
        config.media_dir.clone(),
        config.media_url.clone(),
    ));
    tokio::fs::create_dir_all(media.dir()).await?;

    let state = AppStateInner::build(
        db,
        PresenceTracker::new(),
        media,
        config.jwt_secret.clone(),
        config.max_image_bytes,
    );
    let app = quickchat_server::app(state, &config.media_dir, &config.media_url);

    let addr = config.addr()?;
    info!("QuickChat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
