mod app;
mod auth;
mod config;
mod error;
mod events;
mod images;
mod mailer;
mod rate_limit;
mod shutdown;
mod state;
mod storage;

#[cfg(test)]
mod testing;

use sqlx::postgres::PgPoolOptions;

use crate::{app::build_app, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "eventboard=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let addr = config.bind_addr;

    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("database ready");

    let state = AppState::init(config, db.clone()).await?;
    let app = build_app(state)?;

    let served = app::serve(app, addr).await;
    db.close().await;
    tracing::info!("database pool closed");
    served
}
