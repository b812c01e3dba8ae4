use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod api;
mod baseline;
mod credentials;
mod digest;
mod error;
mod ipc;
mod mailer;
mod poller;
mod scheduler;

use api::{http_client, EventsClient};
use baseline::BaselineStore;
use common::Config;
use credentials::CredentialManager;
use digest::DigestEngine;
use ipc::{start_ipc_server, AdminState};
use mailer::{MailTransport, SmtpMailer};
use poller::Poller;
use scheduler::{CycleOutcome, PollScheduler};

#[derive(Parser, Debug)]
#[command(name = "evwatch-agent", about = "Polls the events API and mails a digest of new events")]
struct Args {
    /// Path to the TOML config (defaults to $EVWATCH_CONFIG or ./config/default.toml)
    #[arg(long)]
    config: Option<String>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Starting evwatch agent");

    // Load configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    info!("Config loaded from {}", config_path);

    let http = http_client(config.api.timeout_secs)?;
    let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(&config.mail)?);

    let credentials = Arc::new(
        CredentialManager::new(
            http.clone(),
            config.api.token_url.clone(),
            config.api.client_id.clone(),
            config.api.client_secret.clone(),
        )
        .with_alerts(mailer.clone(), config.mail.from.clone(), config.mail.recipients.clone()),
    );

    let store = BaselineStore::new(&config.poller.baseline_path);
    info!("Baseline snapshot at {}", store.path().display());

    let poller = Poller::new(
        credentials.clone(),
        EventsClient::new(http, config.api.events_url.clone(), config.api.sort.clone()),
        DigestEngine::new(store, config.api.profile_url.clone()),
        mailer,
        config.mail.from.clone(),
        config.mail.recipients.clone(),
    );
    let scheduler = Arc::new(PollScheduler::new(
        Arc::new(poller),
        Duration::from_secs(config.poller.interval_secs),
    ));

    if args.once {
        let cycle = scheduler.run_once().await;
        if let CycleOutcome::Failed { reason } = cycle.outcome {
            anyhow::bail!("Poll cycle failed: {}", reason);
        }
        return Ok(());
    }

    let admin = AdminState {
        scheduler: scheduler.clone(),
        credentials,
        started_at: Instant::now(),
    };
    start_ipc_server(admin, config.ipc.socket_path.clone()).await?;

    scheduler.start();
    info!("evwatch agent is running");

    wait_for_shutdown().await?;
    info!("Server is shutting down");
    scheduler.stop();
    scheduler.join().await;
    let _ = std::fs::remove_file(&config.ipc.socket_path);
    info!("Server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res?,
            _ = term.recv() => warn!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;
    Ok(())
}
