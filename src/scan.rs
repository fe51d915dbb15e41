//! WiFi network scanning and scan-result records.
//!
//! [`NetworkRecord`] is the unit stored in the discovery cache and listed to
//! operators. The NetworkManager backend produces records by:
//!
//! 1. Triggering a rescan on the interface (`nmcli device wifi rescan`)
//! 2. Waiting briefly for the scan to complete (500ms)
//! 3. Reading the cached list (`nmcli -t -f SSID,SIGNAL,SECURITY device wifi list`)
//! 4. Dropping hidden and duplicate SSIDs
//! 5. Sorting by signal strength (strongest first)

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::interface::run_nmcli;

/// Longest SSID the 802.11 standard allows, in bytes.
pub const MAX_SSID_LEN: usize = 32;

/// One discovered network.
///
/// Records are never modified after a scan produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    /// The SSID (network name), at most [`MAX_SSID_LEN`] bytes.
    pub ssid: String,

    /// Signal strength as a percentage (0-100).
    pub signal: u8,

    /// Security type of the network (e.g., "WPA2", "WPA3", "WEP", "").
    /// Empty string indicates an open network with no encryption.
    pub security: String,
}

impl NetworkRecord {
    pub fn new(ssid: &str, signal: u8, security: &str) -> Self {
        Self {
            ssid: truncate_ssid(ssid, MAX_SSID_LEN).to_string(),
            signal: signal.min(100),
            security: security.to_string(),
        }
    }
}

/// Scans for WiFi networks visible to the specified interface.
///
/// The rescan step can fail while the device is busy or acting as an access
/// point; its result is ignored and the cached list is still returned.
pub async fn scan_networks(interface: &str) -> Result<Vec<NetworkRecord>> {
    if let Err(e) = run_nmcli(&["device", "wifi", "rescan", "ifname", interface]).await {
        debug!("rescan on {interface} refused: {e}");
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let stdout = run_nmcli(&[
        "-t",
        "-f",
        "SSID,SIGNAL,SECURITY",
        "device",
        "wifi",
        "list",
        "ifname",
        interface,
    ])
    .await?;

    Ok(parse_wifi_list(&stdout))
}

/// Parses terse `SSID:SIGNAL:SECURITY` lines.
///
/// Terse output escapes `:` and `\` inside a field with a backslash.
pub fn parse_wifi_list(stdout: &str) -> Vec<NetworkRecord> {
    let mut networks = Vec::new();
    let mut seen_ssids = HashSet::new();

    for line in stdout.lines() {
        let fields = split_terse_fields(line);
        let [ssid, signal, security] = fields.as_slice() else {
            continue;
        };

        if ssid.is_empty() || !seen_ssids.insert(ssid.clone()) {
            continue;
        }

        let signal: u8 = signal.parse().unwrap_or(0);
        networks.push(NetworkRecord::new(ssid, signal, security));
    }

    networks.sort_by(|a, b| b.signal.cmp(&a.signal));
    networks
}

/// Displays a list of networks in a formatted table.
///
/// ```text
/// SSID                             SIGNAL SECURITY
/// ------------------------------------------------------------
/// MyHomeNetwork                      95% ████ WPA2
/// OpenCafe                           45% ██░░
/// ```
pub fn display_networks(networks: &[NetworkRecord]) {
    if networks.is_empty() {
        println!("No networks found.");
        return;
    }

    println!("{:<32} {:>6} {}", "SSID", "SIGNAL", "SECURITY");
    println!("{}", "-".repeat(60));

    for network in networks {
        println!(
            "{:<32} {:>3}% {} {}",
            network.ssid,
            network.signal,
            signal_to_bar(network.signal),
            network.security
        );
    }
}

/// Splits one terse line on unescaped `:` and removes the escapes.
fn split_terse_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => field.push(escaped),
                None => field.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Cuts `ssid` to at most `max_len` bytes without splitting a character.
fn truncate_ssid(ssid: &str, max_len: usize) -> &str {
    if ssid.len() <= max_len {
        return ssid;
    }
    let mut end = max_len;
    while !ssid.is_char_boundary(end) {
        end -= 1;
    }
    &ssid[..end]
}

fn signal_to_bar(signal: u8) -> &'static str {
    match signal {
        80..=100 => "████",
        60..=79 => "███░",
        40..=59 => "██░░",
        20..=39 => "█░░░",
        _ => "░░░░",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wifi_list_dedups_and_sorts_by_signal() {
        let out = "CafeNet:45:WPA2\nHomeNet:90:WPA1 WPA2 802.1X\n:70:WPA2\nCafeNet:80:WPA2\n";

        let parsed = parse_wifi_list(out);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].ssid, "HomeNet");
        assert_eq!(parsed[0].security, "WPA1 WPA2 802.1X");
        assert_eq!(parsed[1].ssid, "CafeNet");
        assert_eq!(parsed[1].signal, 45);
    }

    #[test]
    fn test_parse_wifi_list_unescapes_colons_and_backslashes() {
        let out = "Cafe\\:Guest:80:WPA2\nback\\\\slash:60:\n";

        let parsed = parse_wifi_list(out);

        assert_eq!(
            parsed,
            vec![
                NetworkRecord::new("Cafe:Guest", 80, "WPA2"),
                NetworkRecord::new("back\\slash", 60, ""),
            ]
        );
    }

    #[test]
    fn test_parse_wifi_list_skips_malformed_lines() {
        assert!(parse_wifi_list("OnlySsid\nToo:many:fields:here\n").is_empty());
    }

    #[test]
    fn test_unparseable_signal_defaults_to_zero() {
        let parsed = parse_wifi_list("Lab:--:\n");
        assert_eq!(parsed, vec![NetworkRecord::new("Lab", 0, "")]);
    }

    #[test]
    fn test_record_ssid_is_bounded() {
        let long = "x".repeat(40);
        assert_eq!(NetworkRecord::new(&long, 50, "").ssid.len(), MAX_SSID_LEN);
    }

    #[test]
    fn test_truncate_ssid_respects_char_boundaries() {
        // 31 ASCII bytes followed by a 2-byte character
        let ssid = format!("{}é", "a".repeat(31));
        assert_eq!(truncate_ssid(&ssid, MAX_SSID_LEN), "a".repeat(31));
    }

    #[test]
    fn test_signal_to_bar_buckets() {
        assert_eq!(signal_to_bar(100), "████");
        assert_eq!(signal_to_bar(65), "███░");
        assert_eq!(signal_to_bar(5), "░░░░");
    }
}
