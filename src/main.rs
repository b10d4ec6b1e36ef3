use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fiscal_bridge::credentials::StoreBackedCredentials;
use fiscal_bridge::dispatch::Dispatcher;
use fiscal_bridge::fiscal::{FiscalClient, RegisterClient};
use fiscal_bridge::notify::{LogNotifier, Notifier, TelegramNotifier};
use fiscal_bridge::pipeline::Pipeline;
use fiscal_bridge::server::{self, AppState};
use fiscal_bridge::source::SalonApiClient;
use fiscal_bridge::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://data/fiscal-bridge.db".to_string());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let timeout = Duration::from_secs(cfg.app.request_timeout_secs);
    let fiscal: Arc<dyn FiscalClient> = Arc::new(RegisterClient::new(
        &cfg.fiscal.base_url,
        cfg.fiscal.api_key.clone(),
        cfg.fiscal.cashbox_unique_number.clone(),
        timeout,
    )?);
    let source = Arc::new(SalonApiClient::new(
        &cfg.source.base_url,
        cfg.source.partner_token.clone(),
        cfg.source.user_token.clone(),
        timeout,
    )?);
    let notifier: Arc<dyn Notifier> = if cfg.telegram.enabled {
        Arc::new(TelegramNotifier::new(
            &cfg.telegram.bot_token,
            cfg.telegram.chat_id,
        ))
    } else {
        Arc::new(LogNotifier)
    };
    let credentials = Arc::new(StoreBackedCredentials::new(
        pool.clone(),
        fiscal.clone(),
        cfg.fiscal.login.clone(),
        cfg.fiscal.password.clone(),
    ));

    let dispatcher = Dispatcher::new(fiscal, credentials, notifier);
    let pipeline = Arc::new(Pipeline::new(
        pool.clone(),
        source,
        dispatcher,
        cfg.pipeline.trigger.clone(),
        cfg.fiscal_settings(),
    ));

    let app = server::router(AppState { pipeline, pool });

    info!(bind = %cfg.app.bind, "starting fiscal bridge");
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
