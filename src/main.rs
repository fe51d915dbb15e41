use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wifi_provisioner::{
    NetworkRecord, Provisioner,
    config::{self, Config},
    connection, interface, protocol,
    radio::{Radio, RadioEventSender, event_channel, nmcli::NmcliRadio, simulated::SimulatedRadio},
    scan,
};

#[derive(Parser)]
#[command(name = "wifi-provisioner")]
#[command(about = "Provision a device's WiFi through a temporary setup access point")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning controller until Ctrl-C
    Run {
        /// Use an in-memory radio instead of NetworkManager
        #[arg(long)]
        simulate: bool,

        /// Configurator port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to use (defaults to the first WiFi interface, USB preferred)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// List available WiFi interfaces
    ListInterfaces,

    /// Scan for WiFi networks
    Scan {
        /// Interface to use
        #[arg(short, long)]
        interface: Option<String>,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show connection status
    Status {
        /// Interface to check
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Send one command to a running configurator and print the reply
    Client {
        /// Configurator address
        #[arg(long, default_value = "192.168.4.1")]
        host: IpAddr,

        /// Configurator port (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// `list`, `scan` or `connect:<ssid>:<password>`
        command: String,
    },

    /// Show the effective configuration
    ShowConfig,

    /// Write a config file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = config::resolve_path(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            simulate,
            port,
            interface,
        } => cmd_run(&config_path, simulate, port, interface).await,
        Commands::ListInterfaces => cmd_list_interfaces().await,
        Commands::Scan { interface, json } => cmd_scan(interface.as_deref(), json).await,
        Commands::Status { interface } => cmd_status(interface.as_deref()).await,
        Commands::Client {
            host,
            port,
            command,
        } => cmd_client(&config_path, host, port, &command).await,
        Commands::ShowConfig => cmd_show_config(&config_path),
        Commands::InitConfig { force } => cmd_init_config(&config_path, force),
    }
}

async fn cmd_run(
    config_path: &Path,
    simulate: bool,
    port: Option<u16>,
    interface: Option<String>,
) -> Result<()> {
    let mut cfg = Config::load_from(config_path)?;
    if let Some(port) = port {
        cfg.server.port = port;
    }
    if interface.is_some() {
        cfg.interface = interface;
    }

    let (events_tx, events_rx) = event_channel();
    let radio: Arc<dyn Radio> = if simulate {
        info!("using simulated radio");
        Arc::new(demo_radio(events_tx))
    } else {
        Arc::new(NmcliRadio::new(cfg.interface.clone(), events_tx))
    };

    let provisioner = Provisioner::new(cfg, radio, events_rx);
    let mut status = provisioner.status();
    let shutdown = CancellationToken::new();

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("listening for Ctrl-C failed: {e}");
        }
        info!("shutdown requested");
        ctrl_c.cancel();
    });

    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Some(addr) = current.server_addr {
                println!("Configurator listening on {addr}");
            }
            if let Some(ssid) = current.target_ssid {
                println!("State: {} ({ssid})", current.state);
            } else {
                println!("State: {}", current.state);
            }
        }
    });

    provisioner
        .run(shutdown)
        .await
        .context("Provisioning controller failed")
}

fn demo_radio(events: RadioEventSender) -> SimulatedRadio {
    let radio = SimulatedRadio::new(events);
    radio.set_scan_results(vec![
        NetworkRecord::new("CafeNet", 42, "WPA2"),
        NetworkRecord::new("HomeNet", 87, "WPA2"),
        NetworkRecord::new("Library-Guest", 30, ""),
    ]);
    radio.add_network("HomeNet", "s3cr3t!");
    radio.add_network("Library-Guest", "");
    radio
}

async fn cmd_list_interfaces() -> Result<()> {
    let interfaces = interface::list_wifi_interfaces().await?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {:<12} TYPE", "INTERFACE", "STATE");
    println!("{}", "-".repeat(40));

    for iface in interfaces {
        let iface_type = if iface.is_usb { "USB" } else { "Built-in" };
        println!("{:<16} {:<12} {}", iface.name, iface.state, iface_type);
    }

    Ok(())
}

async fn cmd_scan(interface: Option<&str>, json: bool) -> Result<()> {
    let iface = interface::resolve_interface(interface).await?;
    let networks = scan::scan_networks(&iface.name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&networks)?);
    } else {
        println!("Scanning on interface: {}", iface.name);
        println!();
        scan::display_networks(&networks);
    }

    Ok(())
}

async fn cmd_status(interface: Option<&str>) -> Result<()> {
    let iface = interface::resolve_interface(interface).await?;
    let status = connection::status(&iface.name).await?;
    connection::display_status(&status);

    Ok(())
}

async fn cmd_client(
    config_path: &Path,
    host: IpAddr,
    port: Option<u16>,
    command: &str,
) -> Result<()> {
    let cfg = Config::load_from(config_path)?;
    let addr = SocketAddr::new(host, port.unwrap_or(cfg.server.port));

    let reply = protocol::send_command(addr, command, cfg.server.terminator, CLIENT_TIMEOUT)
        .await
        .with_context(|| format!("Exchange with {addr} failed"))?;

    if reply.is_empty() {
        println!("(no reply)");
    } else {
        print!("{reply}");
    }

    Ok(())
}

fn cmd_show_config(config_path: &Path) -> Result<()> {
    println!("Config file: {}", config_path.display());
    if !config_path.exists() {
        println!("(not present, showing defaults)");
    }
    println!();

    let mut cfg = Config::load_from(config_path)?;
    if !cfg.access_point.password.is_empty() {
        cfg.access_point.password = "*".repeat(cfg.access_point.password.len().min(12));
    }
    print!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    Config::default().save_to(config_path)?;
    println!("Wrote default config to {}", config_path.display());

    Ok(())
}
