//! Local-subnet probe
//!
//! Enumerates a small IPv4 subnet and TCP-probes the backend port on every
//! address. A responsive address is only a candidate; discovery confirms
//! it with a `tags` call before registering a node.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum concurrent connection attempts
const MAX_CONCURRENT: usize = 128;

/// Scans a subnet for hosts answering on the backend port
pub struct SubnetScanner {
    subnet: String,
    port: u16,
    probe_timeout: Duration,
}

impl SubnetScanner {
    pub fn new(subnet: String, port: u16, probe_timeout: Duration) -> Self {
        Self {
            subnet,
            port,
            probe_timeout,
        }
    }

    /// Derive a /24 for the primary outbound interface, when one exists
    ///
    /// Connecting a UDP socket does not send packets; it only asks the OS
    /// which local address would route to the wider network.
    pub fn derive_local_subnet() -> Option<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("192.0.2.1:9").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => {
                let octets = ip.octets();
                Some(format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]))
            }
            _ => None,
        }
    }

    /// Parse the subnet string (e.g. `192.168.1.0/24`) into host addresses
    fn parse_subnet(&self) -> Vec<Ipv4Addr> {
        let parts: Vec<&str> = self.subnet.split('/').collect();
        if parts.len() != 2 {
            warn!("Invalid subnet format: {}", self.subnet);
            return Vec::new();
        }

        let base: Ipv4Addr = match parts[0].parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!("Invalid IP in subnet: {}", parts[0]);
                return Vec::new();
            }
        };

        let prefix: u32 = match parts[1].parse() {
            // Anything wider than /16 would probe tens of thousands of hosts
            Ok(p) if (16..=32).contains(&p) => p,
            _ => {
                warn!("Unsupported prefix length in subnet: {}", self.subnet);
                return Vec::new();
            }
        };

        let base_u32 = u32::from(base);
        let host_bits = 32 - prefix;
        let num_hosts = 1u32 << host_bits;

        // Skip network and broadcast addresses
        (1..num_hosts.saturating_sub(1))
            .map(|i| Ipv4Addr::from((base_u32 & !(num_hosts - 1)) | i))
            .collect()
    }

    /// Probe every host in the subnet; returns the responsive addresses
    pub async fn scan(&self) -> Vec<(String, u16)> {
        let ips = self.parse_subnet();
        if ips.is_empty() {
            return Vec::new();
        }

        debug!(
            "Scanning {} hosts on {} port {}",
            ips.len(),
            self.subnet,
            self.port
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let mut handles = Vec::with_capacity(ips.len());

        for ip in ips {
            let sem = Arc::clone(&semaphore);
            let port = self.port;
            let probe_timeout = self.probe_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.ok()?;
                if probe_port(ip, port, probe_timeout).await {
                    Some((ip.to_string(), port))
                } else {
                    None
                }
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            if let Ok(Some(addr)) = handle.await {
                results.push(addr);
            }
        }

        debug!("Scan complete: {} responsive hosts", results.len());
        results
    }
}

/// Try to connect to a specific port with timeout
async fn probe_port(ip: Ipv4Addr, port: u16, probe_timeout: Duration) -> bool {
    let addr = format!("{}:{}", ip, port);
    timeout(probe_timeout, TcpStream::connect(&addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}
