//! Local IPv4 address discovery.

use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;

use crate::{Error, Result};

/// Find a local IPv4 address by prefix.
///
/// * `""` gives the first non-loopback address.
/// * `"192.168"` gives the first address starting with those octets.
/// * `"127:5555"` gives `"127.0.0.1:5555"`; the port is appended verbatim.
///
/// IPv6 addresses are never returned.
pub fn find_ipv4(filter: &str) -> Result<String> {
    let candidates = local_ipv4_addrs()?;
    let found = select(filter, &candidates)?;
    tracing::debug!(filter, address = %found, "selected interface address");
    Ok(found)
}

fn local_ipv4_addrs() -> Result<Vec<(String, Ipv4Addr)>> {
    let addrs = getifaddrs().map_err(|errno| Error::from(std::io::Error::from(errno)))?;
    Ok(addrs
        .filter_map(|ifaddr| {
            let sin = ifaddr.address?.as_sockaddr_in().copied()?;
            Some((ifaddr.interface_name, *SocketAddrV4::from(sin).ip()))
        })
        .collect())
}

fn select(filter: &str, candidates: &[(String, Ipv4Addr)]) -> Result<String> {
    let (prefix, port) = match filter.split_once(':') {
        Some((_, port)) if port.contains(':') => return Err(Error::IllegalParam),
        Some((prefix, port)) => (prefix, Some(port)),
        None => (filter, None),
    };

    let prefix = if prefix.is_empty() {
        None
    } else {
        if prefix.starts_with('.') {
            return Err(Error::IllegalParam);
        }
        let prefix = if prefix.ends_with('.') {
            prefix.to_string()
        } else {
            format!("{prefix}.")
        };
        if prefix.matches('.').count() > 4 {
            return Err(Error::IllegalParam);
        }
        Some(prefix)
    };

    let ip = candidates
        .iter()
        .map(|(_, ip)| ip)
        .find(|ip| match &prefix {
            Some(prefix) => format!("{ip}.").starts_with(prefix.as_str()),
            None => !ip.is_loopback(),
        })
        .ok_or(Error::BadInterface)?;

    Ok(match port {
        Some(port) => format!("{ip}:{port}"),
        None => ip.to_string(),
    })
}
