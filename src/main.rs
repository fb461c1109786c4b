//! headctl: phone tilt in, desktop key presses out.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use headctl::config::{RuntimeConfig, Settings, DEFAULT_RELAY_URL};
use headctl::dispatcher::DEFAULT_CAPACITY;
use headctl::injector::KeyBackend;
use headctl::local::TlsFiles;
use headctl::logger;
use headctl::mapper::Axis;
use headctl::peer::connection::DEFAULT_STUN;
use headctl::peer::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "headctl")]
#[command(about = "Turns phone tilt streamed over WebRTC into desktop key presses")]
struct Cli {
    /// Settings file (default: ~/.config/headctl/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for the phone through the relay and drive keys from its tilt
    Desktop(PeerArgs),
    /// Run the signaling relay and serve the phone's control page
    Relay {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
    /// Accept offers posted directly over the LAN
    Local {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
        /// Certificate chain (PEM); serves HTTPS together with --key-file
        #[arg(long, requires = "key_file")]
        cert_file: Option<PathBuf>,
        /// Private key (PEM) for --cert-file
        #[arg(long, requires = "cert_file")]
        key_file: Option<PathBuf>,
        #[command(flatten)]
        peer: PeerArgs,
    },
    /// Change saved settings without connecting
    Configure {
        /// Alpha (left/right) threshold in degrees
        #[arg(long)]
        alpha: Option<String>,
        /// Beta (forward/back) threshold in degrees
        #[arg(long)]
        beta: Option<String>,
        /// Pairing code shared with the phone
        #[arg(long)]
        code: Option<String>,
    },
}

#[derive(Args)]
struct PeerArgs {
    /// Relay `/signal` endpoint
    #[arg(long, env = "SIGNAL_API", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// STUN/TURN server, may be repeated
    #[arg(long = "ice-server", default_value = DEFAULT_STUN)]
    ice_servers: Vec<String>,

    /// Answer only offers from mobile-<code>
    #[arg(long)]
    paired_only: bool,

    /// Seconds between mailbox polls
    #[arg(long, default_value_t = 3)]
    poll_interval: u64,

    /// Seconds to search for an offer before giving up
    #[arg(long, default_value_t = 300)]
    search_timeout: u64,

    /// Seconds to wait for local ICE candidates before answering
    #[arg(long, default_value_t = 10)]
    gather_timeout: u64,

    #[arg(long, value_enum, default_value_t = KeyBackend::default())]
    keys: KeyBackend,

    /// Key command queue depth
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    queue: usize,
}

impl PeerArgs {
    fn runtime(&self) -> RuntimeConfig {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|url| {
                let mut server = ServerConfig::stun(url.as_str());
                if url.starts_with("turn") {
                    server.r#type = "turn".into();
                }
                server
            })
            .collect();
        RuntimeConfig {
            relay_url: self.relay_url.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            search_timeout: Duration::from_secs(self.search_timeout),
            ice_servers,
            gather_timeout: Duration::from_secs(self.gather_timeout),
            paired_only: self.paired_only,
            queue_capacity: self.queue,
            key_backend: self.keys,
        }
    }
}

fn configure(
    path: PathBuf,
    alpha: Option<String>,
    beta: Option<String>,
    code: Option<String>,
) -> Result<()> {
    let mut settings = Settings::load(&path)?;
    for (axis, raw) in [(Axis::Alpha, alpha), (Axis::Beta, beta)] {
        if let Some(raw) = raw {
            if !settings.set_threshold(axis, &raw) {
                bail!("invalid {} threshold: {raw}", axis.as_str());
            }
        }
    }
    if let Some(code) = code {
        settings.set_pairing_code(&code);
    }
    settings.save(&path)?;
    info!(path = %path.display(), "settings saved");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Settings::default_path);
    match cli.command {
        Command::Desktop(peer) => headctl::run_desktop(config_path, peer.runtime()).await?,
        Command::Relay { addr } => headctl::run_relay(addr).await?,
        Command::Local {
            addr,
            cert_file,
            key_file,
            peer,
        } => {
            let tls = match (cert_file, key_file) {
                (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
                _ => None,
            };
            headctl::run_local(addr, tls, config_path, peer.runtime()).await?
        }
        Command::Configure { alpha, beta, code } => configure(config_path, alpha, beta, code)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| logger::default_level().to_string());
    logger::init(&level);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // a console read still waiting on stdin must not hold the process open
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
