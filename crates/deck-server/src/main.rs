mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use deck_api::collaborators::{
    Collaborators, FsImageStore, GraphOAuth, HttpIndexer, HttpNotifier, SystemClock, UuidGen,
};
use deck_api::feed::FeedEngine;
use deck_api::{ActionService, RpcHandler, rpc};
use deck_db::Database;
use deck_gateway::{Dispatcher, handle_connection};
use deck_types::models::Settings;

use config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    handler: Arc<RpcHandler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deck=debug,deck_api=debug,deck_gateway=debug,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    if config.signups_frozen {
        db.with_conn_mut(|s| s.save_settings(&Settings { signups_frozen: true }))?;
        info!("Signups frozen by configuration");
    }
    tokio::fs::create_dir_all(&config.image_dir).await?;

    // Collaborators
    let client = reqwest::Client::new();
    let dispatcher = Dispatcher::new();
    let deps = Collaborators {
        pusher: Arc::new(dispatcher.clone()),
        notifier: Arc::new(HttpNotifier::new(
            client.clone(),
            config.slack_webhook.clone(),
            config.push_url.clone(),
            config.email_url.clone(),
        )),
        images: Arc::new(FsImageStore::new(
            client.clone(),
            config.image_dir.clone(),
            &config.image_base_url,
        )),
        indexer: Arc::new(HttpIndexer::new(client.clone(), config.index_url.clone())),
        oauth: Arc::new(GraphOAuth::new(
            client,
            &config.oauth_graph_url,
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
        )),
        clock: Arc::new(SystemClock),
        ids: Arc::new(UuidGen),
    };

    let service = Arc::new(ActionService::new(db, deps, config.coins, FeedEngine::default()));
    service.reload_settings().await?;
    let handler = Arc::new(RpcHandler::new(service.clone()));

    let shutdown = CancellationToken::new();
    let maintenance = tokio::spawn(maintenance_loop(
        service,
        config.maintenance_interval,
        shutdown.clone(),
    ));

    // Routes
    let state = ServerState {
        dispatcher,
        handler: handler.clone(),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(rpc::router(handler))
        .merge(ws_route)
        .nest_service("/images", ServeDir::new(&config.image_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Deck server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = maintenance.await;
    info!("Deck server stopped");
    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.dispatcher, state.handler))
}

/// Periodic cleanup and settings reload until shutdown.
async fn maintenance_loop(service: Arc<ActionService>, every: std::time::Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // the first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = service.run_maintenance().await {
                    error!("Maintenance pass failed: {}", e);
                }
            }
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        }
        _ = shutdown.cancelled() => {}
    }
    info!("Shutting down");
    shutdown.cancel();
}
