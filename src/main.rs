use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use timings::config::AppConfig;
use timings::repository::{Repository, database};
use timings::services::liveness::{ConnectivityMonitor, LivenessTracker};
use timings::services::{StatsView, ViewOptions};
use timings::shell::{SessionEnd, Shell};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: timings [--config PATH] [QUERY_STRING]";

struct Args {
    config: Option<PathBuf>,
    link: String,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        link: String::new(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context(USAGE)?;
                args.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => args.link = arg,
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let result = runtime.block_on(run(args));
    // An idle exit leaves a blocking stdin read behind; don't wait for it.
    runtime.shutdown_background();
    result
}

async fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load(&config_path)?;

    let db_path = config.database_path.to_string_lossy().into_owned();
    let pool = database::init_database(&db_path).await?;
    let repository = Repository::new(pool);

    let today = Utc::now().date_naive();
    let view = Arc::new(StatsView::from_link(
        repository.row_source(),
        repository.summary_writer(),
        &args.link,
        ViewOptions::from_config(&config, today),
    ));
    view.activate();

    let liveness = LivenessTracker::new();
    let watchdog = liveness.spawn_watchdog(
        Duration::from_secs(config.idle_check_interval_secs),
        Duration::from_secs(config.idle_timeout_secs),
    );

    let monitor = Arc::new(ConnectivityMonitor::new(repository.pinger()));
    let keep_alive = monitor
        .clone()
        .spawn_periodic(Duration::from_secs(config.keep_alive_interval_secs));

    let shell = Shell::new(view, liveness).with_connectivity(monitor.subscribe());
    let input = BufReader::new(tokio::io::stdin());

    if let SessionEnd::Idle(_) = shell.run_until_idle(input, tokio::io::stdout(), watchdog).await? {
        info!("Closing idle session");
    }

    keep_alive.abort();
    repository.pool.close().await;
    info!("Bye");
    Ok(())
}
