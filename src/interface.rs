use std::fs;
use std::path::Path;

use serde::Serialize;
use tokio::process::Command;

use crate::error::{ProvisionerError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
    pub is_usb: bool,
}

/// Runs `nmcli` with `args` and returns its stdout.
pub(crate) async fn run_nmcli(args: &[&str]) -> Result<String> {
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .await
        .map_err(|e| ProvisionerError::NmcliExecution(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(ProvisionerError::NmcliExecution(message.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// List all WiFi interfaces on the system
pub async fn list_wifi_interfaces() -> Result<Vec<WifiInterface>> {
    let stdout = run_nmcli(&["-t", "-f", "DEVICE,TYPE,STATE", "device"]).await?;
    Ok(parse_device_list(&stdout))
}

fn parse_device_list(stdout: &str) -> Vec<WifiInterface> {
    let mut interfaces = Vec::new();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 3 && parts[1] == "wifi" {
            let name = parts[0].to_string();
            let is_usb = is_usb_interface(&name);
            interfaces.push(WifiInterface {
                name,
                state: parts[2].to_string(),
                is_usb,
            });
        }
    }

    interfaces
}

/// Check if a network interface is USB-based by examining sysfs
fn is_usb_interface(interface_name: &str) -> bool {
    let device_path = format!("/sys/class/net/{}/device", interface_name);
    let path = Path::new(&device_path);

    if !path.exists() {
        return false;
    }

    if let Ok(resolved) = fs::read_link(path) {
        if let Some(resolved_str) = resolved.to_str() {
            return resolved_str.contains("usb");
        }
    }

    let uevent_path = format!("{}/uevent", device_path);
    fs::read_to_string(&uevent_path)
        .map(|content| content.contains("usb"))
        .unwrap_or(false)
}

/// Get a specific interface by name, verifying it's a WiFi interface
pub async fn get_interface(name: &str) -> Result<WifiInterface> {
    list_wifi_interfaces()
        .await?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| ProvisionerError::InterfaceNotFound(name.to_string()))
}

/// Resolve interface: use provided name or pick a WiFi device, USB adapters first
pub async fn resolve_interface(interface: Option<&str>) -> Result<WifiInterface> {
    match interface {
        Some(name) => get_interface(name).await,
        None => pick_default(list_wifi_interfaces().await?),
    }
}

fn pick_default(mut interfaces: Vec<WifiInterface>) -> Result<WifiInterface> {
    interfaces.sort_by_key(|i| !i.is_usb);
    interfaces
        .into_iter()
        .next()
        .ok_or(ProvisionerError::NoWifiInterfaceFound)
}
