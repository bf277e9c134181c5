use local_ip_address::list_afinet_netifas;
use std::net::{IpAddr, SocketAddr};
use str0m::{net::Protocol, Candidate};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Host ICE candidates for a socket bound to `local`.
///
/// A socket bound to a concrete IP yields exactly that address. For an
/// unspecified bind address every IPv4 interface that is neither loopback nor
/// link-local is offered on the socket's port.
pub fn host_candidates(local: SocketAddr) -> Vec<Candidate> {
    let addrs = if local.ip().is_unspecified() {
        interface_addrs(local.port())
    } else {
        vec![local]
    };

    let mut candidates = Vec::with_capacity(addrs.len());
    for addr in addrs {
        match Candidate::host(addr, Protocol::Udp) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!("Skipping host candidate {}: {:?}", addr, e),
        }
    }

    if candidates.is_empty() {
        warn!("No usable host candidates for {}", local);
    }

    candidates
}

fn interface_addrs(port: u16) -> Vec<SocketAddr> {
    let mut addrs = vec![];
    match list_afinet_netifas() {
        Ok(network_interfaces) => {
            for (name, ip) in network_interfaces {
                if let IpAddr::V4(ip4) = ip {
                    if !ip4.is_loopback() && !ip4.is_link_local() {
                        info!("iface: {} / {:?}", name, ip);
                        addrs.push(SocketAddr::new(ip, port));
                    }
                }
            }
        }
        Err(e) => warn!("Failed to list network interfaces: {}", e),
    }
    addrs
}
