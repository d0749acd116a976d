//! Hemma bridge configuration.

use serde::{Deserialize, Serialize};

use hemma_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, RouterConfig};

use crate::cli::Cli;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HemmaBridgeConfig {
    /// Name identifying this bridge. "auto" uses the host name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Message router settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Serial device settings.
    #[serde(default)]
    pub serial: SerialConfig,

    /// WebSocket server settings.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Service discovery settings.
    #[serde(default)]
    pub announce: AnnounceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_name() -> String {
    "auto".to_string()
}

/// Serial device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path. When absent, the last enumerated serial port is used.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Size of a single read from the device in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_buffer_size() -> usize {
    4096
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: default_baud_rate(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Address to bind, without port.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve the live log on `port + 1`.
    #[serde(default)]
    pub log_stream: bool,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            log_stream: false,
        }
    }
}

impl WebSocketConfig {
    /// `bind:port` of the message server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// `bind:port+1` of the log stream server.
    pub fn log_stream_address(&self) -> Option<String> {
        self.port
            .checked_add(1)
            .map(|port| format!("{}:{}", self.bind, port))
    }
}

/// mDNS announcement configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceConfig {
    #[serde(default = "default_announce")]
    pub enabled: bool,

    /// Discovery domain the service is registered in.
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_announce() -> bool {
    true
}

fn default_domain() -> String {
    "local.".to_string()
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            enabled: default_announce(),
            domain: default_domain(),
        }
    }
}

impl Default for HemmaBridgeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            router: RouterConfig::default(),
            serial: SerialConfig::default(),
            websocket: WebSocketConfig::default(),
            announce: AnnounceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HemmaBridgeConfig {
    /// Apply command line overrides on top of the file settings.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(name) = &cli.name {
            self.name = name.clone();
        }
        if let Some(port) = cli.port {
            self.websocket.port = port;
        }
        if let Some(device) = &cli.serial_device {
            self.serial.device = Some(device.clone());
        }
        if cli.websocket_debug {
            self.websocket.log_stream = true;
        }
        if cli.announce {
            self.announce.enabled = true;
        }
        if cli.no_announce {
            self.announce.enabled = false;
        }
        if let Some(domain) = &cli.domain {
            self.announce.domain = domain.clone();
        }
    }

    /// Get the bridge name to use, resolving "auto" if needed.
    pub fn resolved_name(&self) -> String {
        if self.name == "auto" {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .map(|h| strip_local_suffix(&h).to_string())
                .unwrap_or_else(|| "hemma".to_string())
        } else {
            self.name.clone()
        }
    }

    /// Validate the configuration.
    pub fn validate_config(&self) -> hemma_bridge_framework::Result<()> {
        self.router.validate()?;

        if self.name.trim().is_empty() {
            return Err(BridgeError::validation("name must not be empty"));
        }
        if self.websocket.port == 0 {
            return Err(BridgeError::validation("websocket.port must be non-zero"));
        }
        if self.websocket.log_stream && self.websocket.log_stream_address().is_none() {
            return Err(BridgeError::validation(format!(
                "websocket.port {} leaves no room for the log stream on port + 1",
                self.websocket.port
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(BridgeError::validation("serial.baud_rate must be non-zero"));
        }
        if self.serial.read_buffer_size == 0 {
            return Err(BridgeError::validation(
                "serial.read_buffer_size must be non-zero",
            ));
        }
        if matches!(&self.serial.device, Some(device) if device.is_empty()) {
            return Err(BridgeError::validation("serial.device must not be empty"));
        }
        if self.announce.enabled && self.announce.domain.trim_matches('.').is_empty() {
            return Err(BridgeError::validation("announce.domain must not be empty"));
        }

        Ok(())
    }
}

fn strip_local_suffix(host: &str) -> &str {
    host.strip_suffix(".local").unwrap_or(host)
}

impl BridgeConfig for HemmaBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn router(&self) -> &RouterConfig {
        &self.router
    }

    fn validate(&self) -> hemma_bridge_framework::Result<()> {
        self.validate_config()
    }
}
