//! repo-digest — binary entrypoint.
//! Boots the tracker: config, state store, GitHub source, AI client, sinks,
//! and the tick-driven scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo_digest::config::{start_hot_reload_thread, AppConfig, ConfigHandle};
use repo_digest::fetch::ItemFetcher;
use repo_digest::notify::dashboard::DashboardSink;
use repo_digest::notify::report::ReportSink;
use repo_digest::notify::telegram::TelegramSink;
use repo_digest::notify::SinkMux;
use repo_digest::scheduler::Scheduler;
use repo_digest::source::github::GithubClient;
use repo_digest::store::StateStore;
use repo_digest::summarize::ai::build_ai_client;
use repo_digest::summarize::Summarizer;

#[derive(Debug, Parser)]
#[command(name = "repo-digest", about = "GitHub activity tracker with AI summaries")]
struct Cli {
    /// Path to the configuration file (TOML or JSON).
    #[arg(short, long, default_value = "config/tracker.toml")]
    config: PathBuf,

    /// Run one tracking pass over all repositories and exit.
    #[arg(long)]
    run_once: bool,

    /// Process a single repository (format: owner/name) and exit.
    #[arg(long)]
    repo: Option<String>,

    /// Override the scheduler tick interval in seconds.
    #[arg(long)]
    tick_secs: Option<u64>,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repo_digest=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn init_metrics(addr: &str) -> Result<()> {
    let addr: std::net::SocketAddr = addr.parse().context("parsing metrics_addr")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(tick) = cli.tick_secs {
        cfg.scheduler.tick_secs = tick;
    }
    if let Some(addr) = &cfg.metrics_addr {
        init_metrics(addr)?;
    }

    let store = Arc::new(StateStore::open(&cfg.data_dir.join("tracker_state.json"))?);
    let github = Arc::new(GithubClient::new(cfg.github_token.clone()));

    let mut sinks = SinkMux::new();
    sinks.push(Arc::new(ReportSink::new(cfg.reports_dir.clone())));
    sinks.push(Arc::new(DashboardSink::new(cfg.data_dir.clone())));
    sinks.push(Arc::new(TelegramSink::from_config(&cfg.telegram)));

    let ai = build_ai_client(&cfg.ai);
    let summarizer = Summarizer::new(
        ai,
        std::time::Duration::from_secs(cfg.scheduler.ai_timeout_secs),
    );
    let fetcher = ItemFetcher::new(github.clone());

    let handle = ConfigHandle::new(cfg);
    start_hot_reload_thread(handle.clone(), cli.config.clone());

    let scheduler = Arc::new(Scheduler::new(
        handle,
        fetcher,
        summarizer,
        store,
        Arc::new(sinks),
    ));
    tracing::info!("repo-digest initialized");

    if let Some(full_name) = &cli.repo {
        let outcome = scheduler.run_repo_once(full_name).await?;
        tracing::info!(repo = %full_name, ?outcome, "single-shot run finished");
        return Ok(());
    }

    if cli.run_once {
        let results = scheduler.run_all_once().await;
        let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
        let failed = results.len() - ok;
        tracing::info!(ok, failed, "tracking pass finished");
        log_rate_limit(&github).await;
        return Ok(());
    }

    // Daemon mode: run an initial pass, then hand over to the tick loop until
    // shutdown. Cycles abandoned at a suspension point never half-commit.
    let results = scheduler.run_all_once().await;
    tracing::info!(repos = results.len(), "initial tracking pass finished");
    log_rate_limit(&github).await;

    let loop_handle = tokio::spawn(scheduler.clone().run());
    tokio::signal::ctrl_c().await.context("listening for shutdown")?;
    tracing::info!("shutdown signal received, stopping scheduler");
    loop_handle.abort();
    Ok(())
}

async fn log_rate_limit(github: &GithubClient) {
    match github.rate_limit().await {
        Ok(rl) => tracing::info!(
            remaining = rl.remaining,
            limit = rl.limit,
            reset_epoch = rl.reset_epoch,
            "GitHub API rate limit"
        ),
        Err(e) => tracing::debug!(error = %e, "rate limit probe failed"),
    }
}
