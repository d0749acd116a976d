//! Service discovery announcement.
//!
//! The bridge registers itself over mDNS as `<name>._hemma._tcp.<domain>`,
//! pointing at the websocket port on the first non-loopback IPv4 address of
//! the host. The service is withdrawn again on shutdown.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use anyhow::Context;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Service type, without the domain.
pub const SERVICE_TYPE: &str = "_hemma._tcp.";

/// Fully qualified service type for `domain`, e.g. `_hemma._tcp.local.`.
pub fn service_type(domain: &str) -> String {
    let domain = domain.trim_start_matches('.');
    if domain.ends_with('.') {
        format!("{}{}", SERVICE_TYPE, domain)
    } else {
        format!("{}{}.", SERVICE_TYPE, domain)
    }
}

/// Instance name clients resolve, e.g. `attic._hemma._tcp.local.`.
pub fn full_name(name: &str, domain: &str) -> String {
    format!("{}.{}", name, service_type(domain))
}

/// The address to advertise: the first IPv4 address that is neither
/// loopback nor unspecified.
pub fn announce_address<I>(addresses: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    addresses.into_iter().find_map(|address| match address {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    })
}

fn local_addresses() -> anyhow::Result<Vec<IpAddr>> {
    let interfaces = if_addrs::get_if_addrs().context("Failed to list network interfaces")?;
    Ok(interfaces.iter().map(|interface| interface.ip()).collect())
}

/// A registered service.
pub struct Announcement {
    daemon: ServiceDaemon,
    full_name: String,
}

impl Announcement {
    /// Announce `name` in `domain` for the websocket server on `port`.
    pub fn register(name: &str, domain: &str, port: u16) -> anyhow::Result<Self> {
        let address = announce_address(local_addresses()?)
            .context("No non-loopback IPv4 address to announce")?;

        let daemon = ServiceDaemon::new().context("Failed to start mDNS daemon")?;
        let host = format!("{}.local.", name);
        let service = ServiceInfo::new(
            &service_type(domain),
            name,
            &host,
            IpAddr::V4(address),
            port,
            HashMap::<String, String>::new(),
        )
        .with_context(|| format!("Invalid service {}", full_name(name, domain)))?;

        let full_name = service.get_fullname().to_string();
        daemon
            .register(service)
            .with_context(|| format!("Failed to announce {}", full_name))?;

        info!(service = %full_name, %address, port, "Service announced");
        Ok(Self { daemon, full_name })
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Unregister the service and stop the mDNS daemon.
    pub fn withdraw(self) -> anyhow::Result<()> {
        self.daemon
            .unregister(&self.full_name)
            .with_context(|| format!("Failed to withdraw {}", self.full_name))?;
        self.daemon
            .shutdown()
            .context("Failed to stop mDNS daemon")?;

        info!(service = %self.full_name, "Service withdrawn");
        Ok(())
    }
}

/// Keep `announcement` registered until shutdown.
pub async fn run(announcement: Announcement, shutdown: CancellationToken) {
    shutdown.cancelled().await;

    if let Err(e) = announcement.withdraw() {
        warn!(error = %format!("{:#}", e), "Failed to withdraw service");
    }
}
