mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_api::blobs::DiskBlobStore;
use huddle_api::email::LogEmailSender;
use huddle_api::unfurl::HttpUnfurler;
use huddle_api::{AppState, AppStateInner, routes};
use huddle_db::Database;
use huddle_gateway::connection;
use huddle_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new();

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
        blobs: Arc::new(DiskBlobStore::new(config.blob_dir.clone(), config.public_url.clone()).await?),
        unfurler: Arc::new(HttpUnfurler::new(config.unfurl_timeout)?),
        email: Arc::new(LogEmailSender),
        public_url: config.public_url.clone(),
        invite_ttl_days: config.invite_ttl_days,
    });

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
        dispatcher,
        db,
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = routes::router(app_state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Huddle server listening on {}", config.addr);
    info!("Public URL: {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret))
}
