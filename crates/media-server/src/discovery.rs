//! mDNS advertisement so head units can find the server.
//!
//! Publishes the control and notification ports with the host name.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceInfo};

pub const SERVICE_TYPE: &str = "_carmedia._tcp.local.";

/// Resolved `[discovery]` settings; absent when advertising is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Instance name; the host name when unset.
    pub name: Option<String>,
}

/// Handle for an active mDNS advertisement.
pub struct DiscoveryAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Build the service record for this server.
pub fn service_info(
    instance: &str,
    host_base: &str,
    ip: IpAddr,
    command_port: u16,
    notification_port: u16,
) -> Result<ServiceInfo, mdns_sd::Error> {
    let host = if host_base.ends_with(".local.") {
        host_base.to_string()
    } else {
        format!("{host_base}.local.")
    };
    let properties: HashMap<String, String> = [
        ("hostname".to_string(), host_base.to_string()),
        ("command_port".to_string(), command_port.to_string()),
        ("notification_port".to_string(), notification_port.to_string()),
        ("audio".to_string(), "true".to_string()),
    ]
    .into_iter()
    .collect();
    ServiceInfo::new(SERVICE_TYPE, instance, &host, ip, command_port, properties)
}

/// Start advertising; `None` when mDNS is unavailable on this host.
pub fn spawn_advertiser(
    config: &DiscoveryConfig,
    command_addr: SocketAddr,
    notification_addr: SocketAddr,
) -> Option<DiscoveryAdvertiser> {
    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: daemon start failed");
            return None;
        }
    };
    let host_base = hostname();
    let instance = config.name.clone().unwrap_or_else(|| host_base.clone());
    let ip = if command_addr.ip().is_unspecified() {
        local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    } else {
        command_addr.ip()
    };
    let info = match service_info(
        &instance,
        &host_base,
        ip,
        command_addr.port(),
        notification_addr.port(),
    ) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: invalid service record");
            return None;
        }
    };
    let fullname = info.get_fullname().to_string();
    if let Err(e) = daemon.register(info) {
        tracing::warn!(error = %e, "mdns: register failed");
        return None;
    }
    tracing::info!(
        instance = %instance,
        command_addr = %SocketAddr::new(ip, command_addr.port()),
        notification_port = notification_addr.port(),
        "mdns: advertised server"
    );
    Some(DiscoveryAdvertiser { daemon, fullname })
}

impl DiscoveryAdvertiser {
    /// Unregister and shut down the mDNS daemon.
    pub fn shutdown(&self) {
        if let Ok(rx) = self.daemon.unregister(&self.fullname) {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
        if let Ok(rx) = self.daemon.shutdown() {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string())
}

/// Best-effort address of the interface used for outbound traffic.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    if socket.connect("8.8.8.8:80").is_err() && socket.connect("1.1.1.1:80").is_err() {
        return None;
    }
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_both_ports() {
        let info = service_info(
            "dash",
            "carputer",
            IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)),
            4200,
            4201,
        )
        .unwrap();
        assert_eq!(info.get_fullname(), "dash._carmedia._tcp.local.");
        assert_eq!(info.get_hostname(), "carputer.local.");
        assert_eq!(info.get_port(), 4200);
        assert_eq!(info.get_property_val_str("command_port"), Some("4200"));
        assert_eq!(info.get_property_val_str("notification_port"), Some("4201"));
        assert_eq!(info.get_property_val_str("hostname"), Some("carputer"));
    }

    #[test]
    fn qualified_host_name_is_kept() {
        let info = service_info(
            "dash",
            "carputer.local.",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            5000,
            5001,
        )
        .unwrap();
        assert_eq!(info.get_hostname(), "carputer.local.");
    }
}
