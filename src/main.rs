use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transacto::accounts::{Accounts, TokenInfoVerifier, TokenIssuer};
use transacto::api::metrics::init_metrics;
use transacto::api::rate_limit::spawn_cleanup_task;
use transacto::cache::Cache;
use transacto::config::Config;
use transacto::notifications::{email::SystemEmailService, Notifier};
use transacto::wallet::Wallet;
use transacto::AppState;

#[derive(Parser, Debug)]
#[command(name = "transacto")]
#[command(author, version, about = "Digital wallet backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TRANSACTO_CONFIG", default_value = "transacto.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Transacto v{}", env!("CARGO_PKG_VERSION"));

    let db = transacto::db::init(&config.database_url(), &config.server.data_dir).await?;

    // A configured cache that cannot be reached is fatal
    let cache = Cache::from_config(&config.cache).await?;

    let mailer = SystemEmailService::new(config.email.clone());
    if !mailer.is_enabled() {
        tracing::warn!("SMTP is not configured, outgoing email will be logged only");
    }
    let notifier = Notifier::new(Arc::new(mailer));

    let gateway = transacto::payments::from_config(&config.payments);
    let wallet = Wallet::new(
        db.clone(),
        cache.clone(),
        gateway,
        notifier.clone(),
        config.payments.currency.clone(),
    );

    if config.oauth.google_client_id.is_none() {
        tracing::info!("Google sign-in is disabled (no client id configured)");
    }
    let accounts = Accounts::new(
        db.clone(),
        cache.clone(),
        notifier,
        TokenIssuer::new(&config.auth.jwt_secret, config.auth.token_ttl_hours),
        Arc::new(TokenInfoVerifier::new(
            config.oauth.google_client_id.clone(),
            config.oauth.google_tokeninfo_url.clone(),
        )),
        config.email.app_url.clone(),
    );

    if let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password) {
        transacto::db::seed_admin_user(&db, email, password).await?;
    }

    let mut state = AppState::new(config.clone(), db, cache, wallet, accounts);
    match init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
    }
    let state = Arc::new(state);

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let app = transacto::api::create_router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;

    tracing::info!("API server listening on http://{}", api_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
