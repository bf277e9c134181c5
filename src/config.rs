use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureConstraints;
use crate::error::ConfigError;

/// Top level configuration of the publisher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub whip: WhipConfig,
    pub capture: CaptureConstraints,
}

impl PublishConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Settings of one WHIP publishing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhipConfig {
    /// Local address the peer connection socket binds to. With an
    /// unspecified IP every routable interface becomes a host candidate.
    pub bind_addr: SocketAddr,
    /// Deadline for the signaling POST.
    pub signaling_timeout_ms: u64,
    /// Samples buffered between the forwarding tasks and the transport.
    pub sample_queue: usize,
    /// Send `DELETE` to the WHIP resource when the session closes.
    pub terminate_on_close: bool,
}

impl Default for WhipConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            signaling_timeout_ms: 10_000,
            sample_queue: 64,
            terminate_on_close: true,
        }
    }
}

impl WhipConfig {
    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }
}
