//! The configurator's line protocol.
//!
//! A request is a single command terminated by a sentinel character (`#` by
//! default) and at most 80 bytes long:
//!
//! | Request                     | Response                         |
//! |-----------------------------|----------------------------------|
//! | `list`                      | `<ssid>,\n` per cached network   |
//! | `scan`                      | nothing                          |
//! | `connect:<ssid>:<password>` | nothing, closed immediately      |
//! | anything else               | `Unknown command!\n`             |
//!
//! The server closes the connection after every request.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::radio::TargetNetworkCredential;
use crate::scan::{MAX_SSID_LEN, NetworkRecord};

pub const UNKNOWN_COMMAND_RESPONSE: &str = "Unknown command!\n";

const CONNECT_PREFIX: &str = "connect:";

/// Longest WPA passphrase.
const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Scan,
    Connect(TargetNetworkCredential),
    Unknown(String),
}

impl Command {
    /// Parses one request line. Matching is case-sensitive.
    pub fn parse(line: &str) -> Self {
        match line {
            "list" => Command::List,
            "scan" => Command::Scan,
            _ => match line.strip_prefix(CONNECT_PREFIX).and_then(parse_credential) {
                Some(cred) => Command::Connect(cred),
                None => Command::Unknown(line.to_string()),
            },
        }
    }
}

/// Splits `<ssid>:<password>`; the password may itself contain `:`.
fn parse_credential(rest: &str) -> Option<TargetNetworkCredential> {
    let (ssid, password) = rest.split_once(':')?;
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || password.len() > MAX_PASSWORD_LEN {
        return None;
    }
    Some(TargetNetworkCredential {
        ssid: ssid.to_string(),
        password: password.to_string(),
    })
}

/// Reads one command.
///
/// Stops at `terminator`, after `max_len` bytes, or at end of stream,
/// whichever comes first; the terminator is not part of the result. Bytes
/// past `max_len` are left unread. A stream that ends before sending
/// anything is an [`io::ErrorKind::UnexpectedEof`] error.
pub async fn read_command<R>(reader: &mut R, terminator: u8, max_len: usize) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(max_len);
    let mut saw_terminator = false;

    while line.len() < max_len {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        if byte == terminator {
            saw_terminator = true;
            break;
        }
        line.push(byte);
    }

    if line.is_empty() && !saw_terminator && max_len > 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a command was sent",
        ));
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Renders the `list` response body.
pub fn format_list(records: &[NetworkRecord]) -> String {
    records
        .iter()
        .map(|r| format!("{},\n", r.ssid))
        .collect()
}

/// Sends `command` to a configurator and returns everything it answers
/// before closing the connection.
pub async fn send_command(
    addr: SocketAddr,
    command: &str,
    terminator: char,
    timeout: Duration,
) -> io::Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        let mut request = String::with_capacity(command.len() + 1);
        request.push_str(command);
        request.push(terminator);
        stream.write_all(request.as_bytes()).await?;
        if let Err(e) = stream.shutdown().await {
            debug!("half-closing {addr}: {e}");
        }

        let mut response = Vec::new();
        match stream.read_to_end(&mut response).await {
            Ok(_) => {}
            // The server may close before reading everything we sent.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
            Err(e) => return Err(e),
        }
        Ok(String::from_utf8_lossy(&response).into_owned())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "configurator did not answer"))?
}
