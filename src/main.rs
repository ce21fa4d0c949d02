use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subsync::config::Config;
use subsync::db::{self, AppState};
use subsync::error::Result;
use subsync::handlers;
use subsync::reconcile;
use subsync::vendors::{Gateways, PlanCache};

#[derive(Parser)]
#[command(name = "subsync", about = "In-app purchase verification server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Sync the purchase cache and re-verify live purchases with the vendors
    Reverify,
    /// Sync the file-backed purchase cache and exit
    SyncCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = db::create_pool(&config.database_path)?;
    let conn = pool.get()?;
    db::init_db(&conn)?;
    drop(conn);

    let state = AppState {
        db: pool.clone(),
        gateways: Gateways::unconfigured(),
        plan_cache: Arc::new(PlanCache::new()),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, state).await,
        Command::Reverify => {
            reconcile::run_reverify_sweep(&pool, &state.gateways, &state.plan_cache, &config)
                .await?;
            Ok(())
        }
        Command::SyncCache => {
            let conn = pool.get()?;
            subsync::cache::sync(&conn, &config)?;
            Ok(())
        }
    }
}

async fn serve(config: Config, state: AppState) -> Result<()> {
    let app = handlers::build_router(state);

    let addr = config.addr();
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
