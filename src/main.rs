//! Quiz Live Back binary entrypoint wiring REST, SSE, and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_live_back::{
    config::AppConfig,
    dao::{
        session_store::{MemorySessionStore, NotifyingStore, SessionStore},
        storage::StorageError,
    },
    events::EventChannel,
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    let mongo_uri = env::var("MONGO_URI").ok();
    let mongo_db = env::var("MONGO_DB").ok();
    let channel = app_state.event_channel();
    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        connect_store(mongo_uri.clone(), mongo_db.clone(), channel.clone())
    }));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connect the configured backend and wrap it so every write is published.
///
/// Without `MONGO_URI` the server keeps sessions in memory.
async fn connect_store(
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
    channel: Arc<dyn EventChannel>,
) -> Result<Arc<dyn SessionStore>, StorageError> {
    let inner: Arc<dyn SessionStore> = match mongo_uri {
        #[cfg(feature = "mongo-store")]
        Some(uri) => {
            use quiz_live_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

            let config = MongoConfig::from_uri(&uri, mongo_db.as_deref()).await?;
            Arc::new(MongoSessionStore::connect(config).await?)
        }
        #[cfg(not(feature = "mongo-store"))]
        Some(_) => {
            warn!(db = ?mongo_db, "MONGO_URI set but the mongo-store feature is disabled; using in-memory sessions");
            Arc::new(MemorySessionStore::new())
        }
        None => {
            warn!("MONGO_URI not set; sessions are kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };
    Ok(Arc::new(NotifyingStore::new(inner, channel)))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
