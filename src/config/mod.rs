use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GroupCallError, Result};
use crate::recording::MediaProfile;

pub struct Config {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub recording: RecordingConfig,
    pub log_format: LogFormat,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub struct MediaConfig {
    pub engine: MediaEngineKind,
    pub kms_uri: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub output_dir: String,
    pub profile: MediaProfile,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: "/tmp".to_string(),
            profile: MediaProfile::Webm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEngineKind {
    Kurento,
    InMemory,
}

impl FromStr for MediaEngineKind {
    type Err = GroupCallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kurento" | "kms" => Ok(Self::Kurento),
            "memory" | "in-memory" => Ok(Self::InMemory),
            other => Err(GroupCallError::InvalidConfiguration(format!(
                "unknown MEDIA_ENGINE '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = var("SERVER_PORT", "8080").parse::<u16>().map_err(|e| {
            GroupCallError::InvalidConfiguration(format!("SERVER_PORT: {}", e))
        })?;

        let timeout_ms = var("MEDIA_REQUEST_TIMEOUT_MS", "10000")
            .parse::<u64>()
            .map_err(|e| {
                GroupCallError::InvalidConfiguration(format!("MEDIA_REQUEST_TIMEOUT_MS: {}", e))
            })?;

        let log_format = match var("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            server: ServerConfig {
                host: var("SERVER_HOST", "0.0.0.0"),
                port,
            },
            media: MediaConfig {
                engine: var("MEDIA_ENGINE", "kurento").parse()?,
                kms_uri: var("KMS_WS_URI", "ws://localhost:8888/kurento"),
                request_timeout: Duration::from_millis(timeout_ms),
            },
            recording: RecordingConfig {
                enabled: var("RECORDING_ENABLED", "true").parse().unwrap_or(true),
                output_dir: var("RECORDING_OUTPUT_DIR", "/tmp"),
                profile: var("RECORDING_MEDIA_PROFILE", "WEBM").parse()?,
            },
            log_format,
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}
