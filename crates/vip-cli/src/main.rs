//! ViP CLI - resolve addresses, place and answer calls, run tunnels
//!
//! Identities come from the `--config` file, or from `--address`/`--ip`
//! on the command line.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vip_core::LogicalAddress;
use vip_stack::{IdentityConfig, StackConfig};

mod stack;
mod tunnel;

/// ViP - logical addressing, calls and tunnels for door-entry devices
#[derive(Parser)]
#[command(name = "vip")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "VIP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Local identity given on the command line
#[derive(Args, Debug, Clone)]
struct IdentityArgs {
    /// Logical address to register, e.g. 00000123:1
    #[arg(short, long)]
    address: Option<LogicalAddress>,

    /// IPv4 address of the local interface
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    #[arg(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    /// UDP port of the identity
    #[arg(short = 'P', long, default_value_t = vip_core::DEFAULT_PORT)]
    port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a logical address to an IP endpoint
    Resolve {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Address to resolve
        target: LogicalAddress,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "20")]
        timeout: u64,
    },

    /// Answer incoming calls
    Listen {
        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Place a call and hang up after a while
    Call {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Callee
        target: LogicalAddress,

        /// Seconds to stay connected
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Call id carried in START
        #[arg(long, default_value = "1")]
        call_id: u32,
    },

    /// Accept tunnels and echo every channel
    TunnelServer {
        /// TCP bind address
        #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], vip_core::DEFAULT_TUNNEL_PORT)))]
        bind: SocketAddr,

        /// Run without the UDP lane
        #[arg(long)]
        no_lane: bool,
    },

    /// Open a tunnel and send a message on a channel
    TunnelClient {
        /// Tunnel server address
        server: SocketAddr,

        /// Text to send once the channel is open
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// Send as a datagram (over the lane when it is up)
        #[arg(long)]
        datagram: bool,

        /// Run without the UDP lane
        #[arg(long)]
        no_lane: bool,
    },

    /// Show version and protocol info
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let running = shutdown_flag()?;
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Resolve {
            identity,
            target,
            timeout,
        } => {
            println!(
                "{} Resolving {}",
                "VIP".cyan().bold(),
                target.to_string().yellow()
            );
            let config = stack_config(config, &identity)?;
            stack::resolve(config, target, timeout, &running)?;
        }

        Commands::Listen { identity } => {
            let config = stack_config(config, &identity)?;
            stack::listen(config, &running)?;
        }

        Commands::Call {
            identity,
            target,
            duration,
            call_id,
        } => {
            println!(
                "{} Calling {}",
                "VIP".cyan().bold(),
                target.to_string().yellow()
            );
            let config = stack_config(config, &identity)?;
            stack::call(config, target, duration, call_id, &running)?;
        }

        Commands::TunnelServer { bind, no_lane } => {
            println!(
                "{} Starting tunnel server on {}",
                "VIP".cyan().bold(),
                bind
            );
            let mut config = load_config(config)?.tunnel;
            config.lane.enabled &= !no_lane;
            tunnel::serve(bind, config, &running)?;
        }

        Commands::TunnelClient {
            server,
            message,
            datagram,
            no_lane,
        } => {
            println!(
                "{} Connecting tunnel to {}",
                "VIP".cyan().bold(),
                server
            );
            let mut config = load_config(config)?.tunnel;
            config.lane.enabled &= !no_lane;
            tunnel::client(server, config, message, datagram, &running)?;
        }

        Commands::Info => {
            print_info(config)?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

/// Cleared on Ctrl+C
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(running)
}

fn load_config(path: Option<&Path>) -> Result<StackConfig> {
    match path {
        Some(path) => StackConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(StackConfig::default()),
    }
}

/// Config file identities plus the one given on the command line
fn stack_config(path: Option<&Path>, args: &IdentityArgs) -> Result<StackConfig> {
    let mut config = load_config(path)?;
    match (args.address, args.ip) {
        (Some(address), Some(ip)) => config.identities.push(IdentityConfig {
            address,
            ip,
            netmask: args.netmask,
            port: args.port,
        }),
        (Some(_), None) => bail!("--address needs --ip"),
        (None, Some(_)) => bail!("--ip needs --address"),
        (None, None) => {}
    }
    if config.identities.is_empty() {
        bail!("No identity configured; pass --address and --ip or a config file");
    }
    Ok(config)
}

fn print_info(path: Option<&Path>) -> Result<()> {
    println!(
        "{}",
        "ViP - logical addressing, calls and tunnels".cyan().bold()
    );
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!();
    println!("{}", "Protocols:".green());
    println!(
        "  - CRP  address resolution      UDP {}",
        vip_core::DEFAULT_PORT
    );
    println!(
        "  - CTP  reliable transport      UDP {}",
        vip_core::DEFAULT_PORT
    );
    println!("  - CSP  call signalling         over CTP");
    println!(
        "  - Tunnel channels + UDP lane   TCP {}",
        vip_core::DEFAULT_TUNNEL_PORT
    );

    if let Some(path) = path {
        let config = load_config(Some(path))?;
        println!();
        println!("{} {}", "Identities in".green(), path.display());
        for identity in &config.identities {
            println!(
                "  {}  {}/{}  port {}",
                identity.address.to_string().yellow(),
                identity.ip,
                identity.netmask,
                identity.port
            );
        }
    }

    println!();
    println!("{}", "Examples:".green());
    println!("  vip resolve -a 00000456:1 --ip 192.168.1.20 00000123");
    println!("  vip listen -a 00000123 --ip 192.168.1.10");
    println!("  vip call -a 00000456:1 --ip 192.168.1.20 00000123");
    println!("  vip tunnel-server --bind 0.0.0.0:64100");
    println!("  vip tunnel-client 192.168.1.10:64100 --message hi");
    Ok(())
}
