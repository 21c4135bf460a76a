use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use runway::config::{DEFAULT_PLANES, DEFAULT_RUNWAYS};
use runway::server::{DEFAULT_PORT, run_headless};
use runway::{ConfigCommand, Priority, ServerConfig, SimulationConfig, observer};

#[derive(Debug, Parser)]
#[command(name = "runway-manager", version, about = "Priority-ordered runway scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept one observer, read its CONFIG and stream telemetry back.
    Serve(ServeArgs),
    /// Connect to a running manager, send CONFIG and print telemetry.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "RUNWAY_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "RUNWAY_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Runway count (overridden by the observer's CONFIG).
    #[arg(long, env = "RUNWAY_RUNWAYS", default_value_t = DEFAULT_RUNWAYS)]
    runways: usize,

    /// Shortest runway time per plane, in milliseconds.
    #[arg(long, env = "RUNWAY_HOLD_MIN_MS", default_value_t = 2000)]
    hold_min_ms: u64,

    /// Longest runway time per plane, in milliseconds.
    #[arg(long, env = "RUNWAY_HOLD_MAX_MS", default_value_t = 4000)]
    hold_max_ms: u64,

    /// Interval between progress reports, in milliseconds.
    #[arg(long, env = "RUNWAY_SLICE_MS", default_value_t = 50)]
    slice_ms: u64,

    /// Delay between plane launches, in milliseconds.
    #[arg(long, env = "RUNWAY_STAGGER_MS", default_value_t = 100)]
    stagger_ms: u64,

    /// Seconds the observer has to send CONFIG.
    #[arg(long, env = "RUNWAY_HANDSHAKE_TIMEOUT", default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Seed for plane hold times.
    #[arg(long, env = "RUNWAY_SEED")]
    seed: Option<u64>,

    /// Comma-separated priorities, one per plane. Skips the CONFIG handshake.
    #[arg(long, env = "RUNWAY_PRIORITIES", value_delimiter = ',')]
    priorities: Option<Vec<Priority>>,

    /// Run without waiting for an observer. Requires --priorities.
    #[arg(long, requires = "priorities")]
    headless: bool,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, env = "RUNWAY_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "RUNWAY_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_RUNWAYS)]
    runways: usize,

    /// Comma-separated priorities, one per plane. Defaults to 1..=10.
    #[arg(long, value_delimiter = ',')]
    priorities: Option<Vec<Priority>>,

    /// Only listen; do not send CONFIG.
    #[arg(long)]
    no_config: bool,
}

/// Initialize tracing with RUNWAY_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("RUNWAY_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("runway={level},runway_manager={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("runway-manager {}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => watch(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut simulation = SimulationConfig::default()
        .with_runways(args.runways)
        .with_hold_ms(args.hold_min_ms..=args.hold_max_ms)
        .with_progress_slice(Duration::from_millis(args.slice_ms))
        .with_launch_stagger(Duration::from_millis(args.stagger_ms));
    if let Some(seed) = args.seed {
        simulation = simulation.with_seed(seed);
    }
    simulation.validate().context("invalid simulation settings")?;

    let report = match (args.headless, args.priorities) {
        (true, Some(priorities)) => run_headless(simulation, &priorities).await?,
        (_, priorities) => {
            let server = ServerConfig {
                host: args.host,
                port: args.port,
                handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
            };
            runway::serve(server, simulation, priorities).await?.simulation
        }
    };

    for flight in &report.flights {
        info!(
            plane = %flight.plane_id,
            priority = %flight.priority,
            runway = %flight.runway,
            waited = ?flight.queued_for,
            "Flight summary"
        );
    }
    anyhow::ensure!(
        report.all_landed(),
        "{} plane(s) did not land: {:?}",
        report.failed.len(),
        report.failed
    );
    Ok(())
}

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let priorities = match args.priorities {
        Some(p) => p,
        None => (1..=DEFAULT_PLANES as u32).filter_map(Priority::new).collect(),
    };
    let command = ConfigCommand::new(args.runways, priorities);
    let addr = format!("{}:{}", args.host, args.port);

    let stream = observer::connect_with_retry(&addr, 100, Duration::from_millis(100)).await?;
    let board = observer::watch(
        stream,
        (!args.no_config).then_some(&command),
        |event| println!("{event}"),
    )
    .await?;

    println!();
    print!("{board}");
    info!(
        received = board.received(),
        all_completed = board.all_completed(),
        "Watch finished"
    );
    Ok(())
}
