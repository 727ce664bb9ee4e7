//! ---
//! uev_section: "05-networking-external-interfaces"
//! uev_subsection: "binary"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Binary entrypoint for the events client CLI."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use uev_common::config::AppConfig;
use uev_common::logging::init_tracing;
use uev_common::time::SessionClock;
use uev_msg::{
    replay_script, Ack, LineNumber, LineState, RealChannel, SoftChannel, SoftEventMetrics,
    SoftEventPeer, SyncCoordinator, ZmqRequester,
};

mod session;
mod version;

use version::VersionInfo;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Soft/real event client for a data-acquisition recorder",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override soft.remote_addr")]
    soft_remote: Option<SocketAddr>,

    #[arg(long, value_name = "ADDR", help = "Override soft.local_bind_addr")]
    soft_bind: Option<SocketAddr>,

    #[arg(long, value_name = "ENDPOINT", help = "Override real.remote_addr")]
    real_remote: Option<String>,

    #[arg(long, help = "Print channel metrics in text exposition format on exit")]
    print_metrics: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the configured demonstration session")]
    Run,
    #[command(about = "Send one real trigger and its soft TTL twin")]
    Sync(LineArgs),
    #[command(about = "Send one soft-only TTL event")]
    Ttl(LineArgs),
    #[command(about = "Send one soft text event")]
    Text {
        #[arg(help = "UTF-8 payload")]
        payload: String,
    },
    #[command(about = "Replay a newline-delimited JSON event script")]
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    #[command(about = "Act as the recorder's soft endpoint and acknowledge frames")]
    Listen {
        #[arg(long, help = "Stop after this many frames")]
        count: Option<usize>,
        #[arg(long, default_value_t = 30_000, help = "Stop after this long without traffic")]
        idle_timeout_ms: u64,
    },
}

#[derive(Debug, clap::Args)]
struct LineArgs {
    #[arg(long, help = "Zero-based TTL line")]
    line: u8,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1), help = "0 or 1")]
    state: u8,
}

impl LineArgs {
    fn event(&self) -> (LineNumber, LineState) {
        (LineNumber::new(self.line), LineState::from_wire(self.state))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/uev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(addr) = cli.soft_remote {
        config.soft.remote_addr = addr;
    }
    if let Some(addr) = cli.soft_bind {
        config.soft.local_bind_addr = addr;
    }
    if let Some(endpoint) = &cli.real_remote {
        config.real.remote_addr = endpoint.clone();
    }
    config.validate().context("invalid configuration after CLI overrides")?;

    init_tracing("uevctl", &config.logging)?;
    info!(
        version = %VersionInfo::current().banner(),
        config_path = ?loaded.source,
        "configuration loaded"
    );

    let registry = Registry::new();
    let metrics = Arc::new(SoftEventMetrics::register(&registry)?);

    execute(cli.command.unwrap_or(Commands::Run), &config, metrics)?;

    if cli.print_metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        print!("{}", String::from_utf8_lossy(&buffer));
    }
    Ok(())
}

fn execute(command: Commands, config: &AppConfig, metrics: Arc<SoftEventMetrics>) -> Result<()> {
    let ack_timeout = config.soft.ack_timeout;
    match command {
        Commands::Listen {
            count,
            idle_timeout_ms,
        } => listen(config, count, Duration::from_millis(idle_timeout_ms)),
        Commands::Run => with_coordinator(config, metrics, |coordinator| {
            let report = session::run_session(coordinator, &config.session, ack_timeout)?;
            println!(
                "groups: {}, acks: {}, ack timeouts: {}",
                report.groups, report.acks, report.ack_timeouts
            );
            Ok(())
        }),
        Commands::Sync(args) => with_coordinator(config, metrics, |coordinator| {
            let (line, state) = args.event();
            let pair = coordinator.emit_sync(line, state)?;
            println!("real reply: {}", pair.real_reply);
            render_ack(&coordinator.drain_ack(ack_timeout)?);
            Ok(())
        }),
        Commands::Ttl(args) => with_coordinator(config, metrics, |coordinator| {
            let (line, state) = args.event();
            coordinator.emit_extra_ttl(line, state)?;
            render_ack(&coordinator.drain_ack(ack_timeout)?);
            Ok(())
        }),
        Commands::Text { payload } => with_coordinator(config, metrics, |coordinator| {
            coordinator.emit_text(payload.as_bytes())?;
            render_ack(&coordinator.drain_ack(ack_timeout)?);
            Ok(())
        }),
        Commands::Replay { file } => with_coordinator(config, metrics, |coordinator| {
            let summary = replay_script(coordinator, &file, ack_timeout)
                .with_context(|| format!("replaying {}", file.display()))?;
            println!(
                "events: {}, acks: {}, ack timeouts: {}",
                summary.events, summary.acks, summary.ack_timeouts
            );
            Ok(())
        }),
    }
}

/// Open both channels, run `body`, then log the coordinator counters.
fn with_coordinator<F>(config: &AppConfig, metrics: Arc<SoftEventMetrics>, body: F) -> Result<()>
where
    F: FnOnce(&mut SyncCoordinator<'_, ZmqRequester>) -> Result<()>,
{
    let mut real = RealChannel::open(&config.real.remote_addr)?.with_metrics(metrics.clone());
    let mut soft = SoftChannel::open(config.soft.local_bind_addr, config.soft.remote_addr)?
        .with_framing(config.soft.text_framing)
        .with_metrics(metrics);
    let clock = SessionClock::for_mode(config.session.clock);
    let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, clock);

    body(&mut coordinator)?;

    let counters = coordinator.counters();
    info!(
        sync_pairs = counters.sync_pairs,
        extra_ttl = counters.extra_ttl,
        text = counters.text,
        acks = counters.acks,
        ack_timeouts = counters.ack_timeouts,
        "coordinator finished"
    );
    Ok(())
}

fn listen(config: &AppConfig, count: Option<usize>, idle: Duration) -> Result<()> {
    let clock = SessionClock::for_mode(config.session.clock);
    let mut peer = SoftEventPeer::bind(config.soft.remote_addr, config.soft.text_framing)?;
    info!(addr = %peer.local_addr()?, "listening for soft frames");
    let answered = peer.respond(count, idle, |_| clock.now())?;
    println!("acknowledged {} frame(s)", answered);
    Ok(())
}

fn render_ack(ack: &Ack) {
    let note = if ack.possibly_stale { ", possibly stale" } else { "" };
    match ack.latency {
        Some(latency) => println!("soft ack: {} ({:?}{})", ack.value, latency, note),
        None => println!("soft ack: {}{}", ack.value, note),
    }
}
