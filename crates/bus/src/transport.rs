use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket at the given filesystem path.
    Ipc(String),

    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(path: impl Into<String>) -> Self {
        Self::Ipc(path.into())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(path) => format!("ipc://{path}"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the parent directory exists before binding.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(path) = self {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left over from a previous run.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(path) = self {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl FromStr for Transport {
    type Err = BusError;

    /// Parse `tcp://host:port` or `ipc:///path/to.sock`.
    fn from_str(endpoint: &str) -> Result<Self, Self::Err> {
        let endpoint = endpoint.trim();
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(BusError::Transport(format!("empty IPC path in '{endpoint}'")));
            }
            return Ok(Self::ipc(path));
        }
        let address = endpoint
            .strip_prefix("tcp://")
            .ok_or_else(|| BusError::Transport(format!("unsupported endpoint '{endpoint}'")))?;
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| BusError::Transport(format!("missing port in '{endpoint}'")))?;
        let port = port
            .parse()
            .map_err(|_| BusError::Transport(format!("invalid port in '{endpoint}'")))?;
        if host.is_empty() {
            return Err(BusError::Transport(format!("missing host in '{endpoint}'")));
        }
        Ok(Self::tcp(host, port))
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}
