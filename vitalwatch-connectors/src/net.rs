//! Host network readiness
//!
//! On the host there is no border router to ask. A UDP socket "connected"
//! to the collector makes the kernel pick a route and a source address
//! without sending anything; if that works the network is ready, and the
//! source address becomes the monitor id.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

use vitalwatch_core::transport::NetworkInterface;

use crate::{ConnectorError, ConnectorResult};

/// Readiness check towards one collector
#[derive(Debug, Clone)]
pub struct HostNetwork {
    collector: SocketAddr,
    address: Option<IpAddr>,
}

impl HostNetwork {
    /// Network towards the collector at `host:port`
    pub fn new(host: &str, port: u16) -> ConnectorResult<Self> {
        Ok(Self { collector: resolve(host, port)?, address: None })
    }

    /// Report `address` instead of looking one up
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Resolved collector endpoint
    pub fn collector(&self) -> SocketAddr {
        self.collector
    }

    fn routed_address(&self) -> Option<IpAddr> {
        let bind: SocketAddr = match self.collector {
            SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).ok()?;
        socket.connect(self.collector).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        if ip.is_unspecified() {
            None
        } else {
            Some(ip)
        }
    }
}

impl NetworkInterface for HostNetwork {
    fn global_address(&self) -> Option<IpAddr> {
        self.address.or_else(|| self.routed_address())
    }

    fn has_default_route(&self) -> bool {
        self.routed_address().is_some()
    }
}

/// First socket address `host:port` resolves to. IPv6 literals need no brackets.
pub fn resolve(host: &str, port: u16) -> ConnectorResult<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ConnectorError::Resolve(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| ConnectorError::Resolve(format!("{host}:{port}")))
}
