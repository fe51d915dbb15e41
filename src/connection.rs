//! WiFi connection management through NetworkManager's `nmcli`.
//!
//! Covers both radio roles: joining a network as a station and bringing up
//! the setup hotspot, plus status queries used to detect lost links.

use serde::Serialize;

use crate::config::AccessPointConfig;
use crate::error::{ProvisionerError, Result};
use crate::interface::run_nmcli;

/// Name of the NetworkManager profile used for the setup hotspot.
pub const HOTSPOT_CONNECTION: &str = "wifi-provisioner-ap";

/// Current connection status of a WiFi interface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// The name of the network interface (e.g., "wlan1").
    pub interface: String,

    /// Raw state string from nmcli (e.g., "100 (connected)").
    pub state: String,

    /// Active connection profile, if any.
    pub connection: Option<String>,

    /// Primary IPv4 address with prefix (e.g., "192.168.4.2/24").
    pub ip_address: Option<String>,

    pub gateway: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state.starts_with("100")
    }
}

/// Joins `ssid` on `interface`, creating or updating the profile.
///
/// An empty password joins an open network.
pub async fn connect(interface: &str, ssid: &str, password: &str) -> Result<()> {
    let mut args = vec!["device", "wifi", "connect", ssid];
    if !password.is_empty() {
        args.extend(["password", password]);
    }
    args.extend(["ifname", interface]);

    run_nmcli(&args).await.map_err(|e| match e {
        ProvisionerError::NmcliExecution(msg) => ProvisionerError::ConnectionFailed(msg),
        other => other,
    })?;

    Ok(())
}

/// Brings up the setup hotspot on `interface`.
///
/// NetworkManager runs its shared-mode DHCP server for hotspot profiles, so
/// address assignment is live once this returns.
pub async fn start_hotspot(interface: &str, ap: &AccessPointConfig) -> Result<()> {
    let channel = ap.channel.to_string();
    let mut args = vec![
        "device",
        "wifi",
        "hotspot",
        "ifname",
        interface,
        "con-name",
        HOTSPOT_CONNECTION,
        "ssid",
        ap.ssid.as_str(),
        "band",
        "bg",
        "channel",
        channel.as_str(),
    ];
    if !ap.password.is_empty() {
        args.extend(["password", ap.password.as_str()]);
    }

    run_nmcli(&args).await?;
    Ok(())
}

/// Disconnects `interface` from its current network, keeping the profile.
pub async fn disconnect(interface: &str) -> Result<()> {
    run_nmcli(&["device", "disconnect", interface]).await?;
    Ok(())
}

/// Deletes a saved connection profile by name.
pub async fn delete_connection(name: &str) -> Result<()> {
    run_nmcli(&["connection", "delete", name]).await?;
    Ok(())
}

/// Queries `nmcli -t device show <interface>`.
pub async fn status(interface: &str) -> Result<ConnectionStatus> {
    let stdout = run_nmcli(&["-t", "device", "show", interface]).await?;
    Ok(parse_device_show(interface, &stdout))
}

fn parse_device_show(interface: &str, stdout: &str) -> ConnectionStatus {
    let mut status = ConnectionStatus {
        interface: interface.to_string(),
        state: "unknown".to_string(),
        connection: None,
        ip_address: None,
        gateway: None,
    };

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_string(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_string()),
            "IP4.ADDRESS[1]" if present => status.ip_address = Some(value.to_string()),
            "IP4.GATEWAY" if present => status.gateway = Some(value.to_string()),
            _ => {}
        }
    }

    status
}

/// Prints connection status in a human-readable layout.
pub fn display_status(status: &ConnectionStatus) {
    println!("Interface: {}", status.interface);
    println!("State:     {}", status.state);

    match status.connection {
        Some(ref conn) => println!("Connected: {}", conn),
        None => println!("Connected: (none)"),
    }

    if let Some(ref ip) = status.ip_address {
        println!("IP:        {}", ip);
    }

    if let Some(ref gw) = status.gateway {
        println!("Gateway:   {}", gw);
    }
}
