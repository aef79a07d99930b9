use std::net::SocketAddr;

use axum::{Extension, Router};
use sqlx::SqlitePool;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use watch_party::{config::Config, db, error::AppErr, routes, sync::Hub};

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg  = Config::from_env()?;
    let pool = SqlitePool::connect(&cfg.database_url).await?;
    db::migrate(&pool).await?;
    let hub  = Hub::new(cfg.sync);

    let app = Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(Extension(pool))
        .layer(Extension(hub.clone()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown(hub))
        .await?;
    Ok(())
}

/* Ctrl-C：先關所有房間，連線才會結束 */
async fn shutdown(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        return std::future::pending().await;
    }
    tracing::info!("shutting down");
    hub.shutdown().await;
}
