//! Address model.
//!
//! Endpoints are plain [`SocketAddr`] values: the IPv4 variant carries
//! (host, port), the IPv6 variant (host, port, flow-info, scope-id). This
//! module adds the family selector used by the factory and name resolution.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use crate::error::{Error, Result};

/// Address family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    V4,
    V6,
    /// IPv6 socket that also accepts IPv4 peers through mapped addresses.
    #[default]
    Dual,
}

impl Family {
    /// Guess the family from a textual host: empty means both, a colon means IPv6.
    pub fn for_host(host: &str) -> Self {
        if host.is_empty() {
            Family::Dual
        } else if host.contains(':') {
            Family::V6
        } else {
            Family::V4
        }
    }

    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Family::V4,
            SocketAddr::V6(_) => Family::V6,
        }
    }

    /// Whether a socket of this family can talk to `addr`.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
            Family::Dual => true,
        }
    }

    /// The wildcard address for this family.
    pub fn unspecified(&self, port: u16) -> SocketAddr {
        match self {
            Family::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            Family::V6 | Family::Dual => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }
}

/// Builds an IPv6 address with explicit flow-info and scope-id.
pub fn v6(host: Ipv6Addr, port: u16, flow_info: u32, scope_id: u32) -> SocketAddr {
    SocketAddr::V6(SocketAddrV6::new(host, port, flow_info, scope_id))
}

/// Turns `[::ffff:a.b.c.d]:port` back into `a.b.c.d:port`.
pub fn unmap(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

/// Resolves `host:port` to the addresses usable with `family`.
///
/// An empty host resolves to the wildcard address of the family.
pub async fn resolve(host: &str, port: u16, family: Family) -> Result<Vec<SocketAddr>> {
    if host.is_empty() {
        return Ok(vec![family.unspecified(port)]);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let addr = SocketAddr::new(ip, port);
        return if family.accepts(&addr) {
            Ok(vec![addr])
        } else {
            Err(no_address(host, family))
        };
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(Error::Connection)?
        .filter(|addr| family.accepts(addr))
        .collect();

    if addrs.is_empty() {
        return Err(no_address(host, family));
    }
    Ok(addrs)
}

fn no_address(host: &str, family: Family) -> Error {
    Error::Connection(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("{host} has no {family:?} address"),
    ))
}
