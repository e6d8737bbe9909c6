use std::{fs::File, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use c8s::{ProjectId, config::Config, gateway::QueryClient, monitor::Monitor, runtime::docker::DockerRuntime};
use clap::{ArgAction, Parser};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{
    filter, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Resource usage of docker compose projects, printed as one JSON line per refresh
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (default: ~/.config/c8s/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Refresh interval in seconds, overrides the config file
    #[arg(short, long)]
    interval: Option<u64>,

    /// Print the containers of this project (its working directory) instead of the project list
    #[arg(short, long)]
    project: Option<String>,

    /// Print a single refresh and exit
    #[arg(long)]
    once: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

fn init(args: &Args) -> anyhow::Result<Option<Arc<File>>> {
    let level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("c8s", level)]);

    let log_file = args
        .log_file
        .as_ref()
        .map(|path| {
            File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))
        })
        .transpose()?
        .map(Arc::new);

    let writer = match &log_file {
        Some(file) => BoxMakeWriter::new(file.clone()),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();

    Ok(log_file)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_file = init(&args)?;
    trace!("started with args: {args:?}");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(interval) = args.interval {
        config.refresh_interval = interval;
    }

    let runtime = match DockerRuntime::connect().await {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!("{e}");
            return Err(e).context("cannot reach the docker engine");
        }
    };

    let cancel = CancellationToken::new();
    let monitor = Monitor::start(runtime, &config, cancel);

    if let Err(e) = monitor.discover().await {
        error!("{e:#}");
        monitor.shutdown();
        return Err(e).context("initial container discovery failed");
    }

    let result = refresh_loop(&monitor.client(), &args, &config).await;

    monitor.shutdown();
    if let Some(file) = log_file {
        file.sync_all().context("failed to flush log file")?;
    }

    result
}

async fn refresh_loop(client: &QueryClient, args: &Args, config: &Config) -> anyhow::Result<()> {
    let project = args.project.clone().map(ProjectId::new);

    // first refresh after one period so that stat streams had time to deliver
    let period = Duration::from_secs(config.refresh_interval.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                return Ok(());
            }

            _ = ticker.tick() => {
                print_refresh(client, project.as_ref()).await?;
                if args.once {
                    return Ok(());
                }
            }
        }
    }
}

async fn print_refresh(client: &QueryClient, project: Option<&ProjectId>) -> anyhow::Result<()> {
    let line = match project {
        Some(id) => serde_json::to_string(&client.project_detail(id.clone()).await?)?,
        None => serde_json::to_string(&client.project_list().await?)?,
    };

    println!("{line}");
    Ok(())
}
