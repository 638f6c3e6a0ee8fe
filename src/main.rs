use microblog_api::{
    AppState, PostgresRepository,
    config::{AppConfig, Env, StorageBackend},
    create_router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, connects the selected store and serves HTTP.
/// A missing signing secret stops the process before anything listens.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load().unwrap_or_else(|err| {
        eprintln!("FATAL: invalid configuration: {err}");
        std::process::exit(1);
    });

    // 2. Logging: RUST_LOG wins, otherwise crate debug + request summaries.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "microblog_api=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!(
        access_ttl = %config.access_token_ttl,
        refresh_ttl = %config.refresh_token_ttl,
        "Application starting in {:?} mode",
        config.env
    );

    // 3. Store selection
    let app_state = match config.storage {
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL / DB_* settings.");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("FATAL: Failed to apply database migrations.");

            let repo = Arc::new(PostgresRepository::new(pool));
            AppState::new(config.clone(), repo.clone(), repo)
        }
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory store; all data is lost on exit");
            AppState::in_memory(config.clone())
        }
    }
    .expect("FATAL: Failed to initialize application state.");

    // 4. Router and server
    let app = create_router(app_state);
    let address = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&address)
        .await
        .expect("FATAL: Failed to bind HTTP listener.");

    tracing::info!("Listening on {address}");
    tracing::info!("OpenAPI document at http://localhost:{}/api-docs/openapi.json", config.server_port);

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
