use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

use mission_server::config::{DEFAULT_LOG_FILTER, ServerConfig};
use mission_server::db::Database;
use mission_server::game::GameRoom;
use mission_server::mission::{HandlerRegistry, MissionRegistry};
use mission_server::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging before the config is read so its messages show;
    // the configured filter replaces the default unless RUST_LOG is set
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER)));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    let config = ServerConfig::load()?;
    if !from_env && config.log_filter != DEFAULT_LOG_FILTER {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.log_filter)) {
            warn!("Failed to apply log filter '{}': {}", config.log_filter, e);
        }
    }

    // Load mission definitions from TOML files
    let mut registry = MissionRegistry::new(HandlerRegistry::builtin());
    if let Err(e) = registry.load_from_directory(&config.data_dir) {
        error!("Failed to load mission registry: {}", e);
    }
    if registry.is_empty() {
        warn!("No missions loaded from {}", config.data_dir.display());
    }

    let db = Database::new(&config.database_url)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_url))?;

    let state = AppState {
        room: Arc::new(GameRoom::new(Arc::new(registry), config.rules)),
        db: Arc::new(db),
    };

    // Spawn game tick loop
    let tick_room = Arc::clone(&state.room);
    let tick_interval = config.tick_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            tick_room.tick();
        }
    });

    // Spawn auto-save loop
    let save_state = state.clone();
    let autosave_interval = config.autosave_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave_interval);
        loop {
            interval.tick().await;

            let mut saved_count = 0;
            for player_id in save_state.room.player_ids() {
                // The player may have left since the ids were collected
                let Ok((records, experience)) = save_state.room.save_records(&player_id) else {
                    continue;
                };
                match save_state.db.save_player(&player_id, &records, experience).await {
                    Ok(()) => saved_count += 1,
                    Err(e) => {
                        warn!("Auto-save failed for {}: {}", player_id, e);
                        if let Err(e) = save_state.room.return_unsaved_experience(&player_id, experience) {
                            warn!("Unsaved experience for {} lost: {}", player_id, e);
                        }
                    }
                }
            }

            if saved_count > 0 {
                info!("Auto-saved missions for {} player(s)", saved_count);
            }
        }
    });

    let app = routes::router(state);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr))?;
    info!("Mission server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
