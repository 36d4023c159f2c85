use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use bstock_api as api;

#[derive(Parser)]
#[command(name = "bstock-api", about = "bstock inventory and point-of-sale API", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Run the HTTP server (default)
    #[default]
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Insert the default plan catalog and exit
    SeedPlans,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;

    match cli.command.unwrap_or_default() {
        Command::Migrate => {
            api::db::run_migrations(&db_pool).await?;
            api::db::close_pool(db_pool).await?;
            return Ok(());
        }
        Command::SeedPlans => {
            api::db::run_migrations(&db_pool).await?;
            let plans = api::services::subscriptions::seed_default_plans(&db_pool).await?;
            info!(count = plans.len(), "plan catalog ready");
            api::db::close_pool(db_pool).await?;
            return Ok(());
        }
        Command::Serve => {}
    }

    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    if cfg.seed_plans {
        api::services::subscriptions::seed_default_plans(&db_pool).await?;
    }

    let db_arc = Arc::new(db_pool);
    info!(
        enforcement = ?cfg.plan_limit_enforcement,
        environment = %cfg.environment,
        "starting bstock-api"
    );

    let app_state = api::AppState::new(db_arc.clone(), cfg.clone());
    let app = api::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("bstock-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
