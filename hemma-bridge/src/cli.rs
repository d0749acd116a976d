//! Command line interface.

use clap::Parser;

use hemma_bridge_framework::BridgeArgs;

/// Relay Hemma messages between a serial device and websocket clients.
#[derive(Parser, Debug, Clone)]
#[command(name = "hemma-bridge", version)]
pub struct Cli {
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// Stream the log to websocket clients on port + 1.
    #[arg(short = 'w', long)]
    pub websocket_debug: bool,

    /// WebSocket port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Serial device to use (default: last available port).
    #[arg(short, long)]
    pub serial_device: Option<String>,

    /// Bridge name (default: host name).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Announce the bridge over mDNS (on by default).
    #[arg(short = 'z', long, overrides_with = "no_announce")]
    pub announce: bool,

    /// Do not announce the bridge.
    #[arg(long, overrides_with = "announce")]
    pub no_announce: bool,

    /// Discovery domain to announce in (default: local.).
    #[arg(long)]
    pub domain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from([
            "hemma-bridge",
            "--config",
            "hemma.json5",
            "--debug",
            "--websocket-debug",
            "--port",
            "9000",
            "--serial-device",
            "/dev/ttyUSB1",
            "--name",
            "attic",
            "--announce",
            "--domain",
            "home.arpa.",
        ])
        .unwrap();

        assert_eq!(
            cli.bridge.config.as_deref(),
            Some(std::path::Path::new("hemma.json5"))
        );
        assert!(cli.bridge.debug);
        assert!(cli.websocket_debug);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.serial_device.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(cli.name.as_deref(), Some("attic"));
        assert!(cli.announce);
        assert_eq!(cli.domain.as_deref(), Some("home.arpa."));
    }

    #[test]
    fn test_last_announce_flag_wins() {
        let cli = Cli::try_parse_from(["hemma-bridge", "-z", "--no-announce"]).unwrap();
        assert!(!cli.announce);
        assert!(cli.no_announce);

        let cli = Cli::try_parse_from(["hemma-bridge", "--no-announce", "-z"]).unwrap();
        assert!(cli.announce);
        assert!(!cli.no_announce);
    }

    #[test]
    fn test_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["hemma-bridge", "-p", "70000"]).is_err());
    }

    #[test]
    fn test_short_flags_do_not_clash() {
        let cli = Cli::try_parse_from(["hemma-bridge", "-d", "-w", "-c", "x.json5"]).unwrap();
        assert!(cli.bridge.debug);
        assert!(cli.websocket_debug);
        assert!(cli.port.is_none());
    }
}
