use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use castmon::store::DEFAULT_RECENT_LIMIT;
use castmon::{
    CaptureOutcome, Config, CsvStore, JsonLinePublisher, LoopExit, PacketMonitor, PacketSink,
    PacketStore, PnetCapture, SessionId,
};

/// How often `watch` checks whether the capture thread gave up.
const WATCH_TICK: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "castmon")]
#[command(about = "Packet monitor for text-to-TV casting sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture traffic to the TV and stream packet_update events as JSON lines
    Watch {
        /// TV address (overrides config)
        #[arg(short, long)]
        peer: Option<IpAddr>,
        /// Network interface to capture on (e.g., eth0)
        #[arg(short, long)]
        interface: Option<String>,
        /// Session the captured packets are attributed to
        #[arg(short, long)]
        session: i64,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        seconds: Option<u64>,
        /// Directory holding the packet log (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print packet log statistics as JSON
    Stats {
        /// Only count packets from this session
        #[arg(short, long)]
        session: Option<i64>,
        /// Number of recent packets to include (1-100)
        #[arg(short, long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
        /// Directory holding the packet log (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List network interfaces available for capture
    Interfaces,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.tracing_filter()));

    // stdout carries the event stream, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn watch(config: Config, session: SessionId, seconds: Option<u64>) -> Result<ExitCode> {
    let capture = PnetCapture::from_config(config.interface.as_deref())
        .context("Failed to select capture interface")?;
    let store = CsvStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open packet log in {:?}", config.data_dir))?;

    tracing::info!("Packet log: {:?}", store.path());
    let sink = PacketSink::new(Arc::new(store), Arc::new(JsonLinePublisher::stdout()));
    let settings = config.monitor_settings();
    let monitor = PacketMonitor::new(Arc::new(capture), config.peer_address, settings);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    if !monitor.start(session, sink) {
        anyhow::bail!("Packet monitor is already running");
    }

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut exit = ExitCode::SUCCESS;
    loop {
        match rx.recv_timeout(WATCH_TICK) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("Interrupted");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if !monitor.is_running() {
            match monitor.last_outcome() {
                Some(CaptureOutcome::Finished(LoopExit::PermissionDenied)) => tracing::error!(
                    "Packet capture not permitted - run as root or with CAP_NET_RAW"
                ),
                Some(CaptureOutcome::Panicked) => {
                    tracing::error!("Packet capture thread panicked")
                }
                _ => tracing::error!("Packet capture ended unexpectedly"),
            }
            exit = ExitCode::FAILURE;
            break;
        }
    }

    monitor.stop(monitor.settings().stop_timeout);
    Ok(exit)
}

fn stats(config: &Config, session: Option<SessionId>, limit: usize) -> Result<()> {
    let store = CsvStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open packet log in {:?}", config.data_dir))?;
    let stats = store.query(session, limit).context("Failed to read packet log")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Watch {
            peer,
            interface,
            session,
            seconds,
            data_dir,
        } => {
            if let Some(peer) = peer {
                config.peer_address = peer;
            }
            if interface.is_some() {
                config.interface = interface;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            init_tracing(&config);
            tracing::info!(
                "Watching traffic to {} for session {}",
                config.peer_address,
                session
            );
            watch(config, SessionId(session), seconds)
        }
        Commands::Stats {
            session,
            limit,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            init_tracing(&config);
            stats(&config, session.map(SessionId), limit)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Interfaces => {
            for iface in PnetCapture::list_interfaces() {
                println!("{}", iface);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
