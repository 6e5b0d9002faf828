//! Local address discovery for the startup banner.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Addresses this host is likely reachable on, loopback first.
///
/// The outbound address is found by connecting an unbound UDP socket to a
/// public address; no packet is sent. Discovery failures are logged and
/// leave only loopback in the list.
pub fn local_addresses() -> Vec<IpAddr> {
    let mut addrs = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
    match outbound_address() {
        Ok(ip) if !addrs.contains(&ip) => addrs.push(ip),
        Ok(_) => {}
        Err(err) => log::warn!("could not detect network interfaces: {}", err),
    }
    addrs
}

fn outbound_address() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(("8.8.8.8", 80))?;
    Ok(socket.local_addr()?.ip())
}

/// `http://ip:port` for every address the bound listener serves.
pub fn interface_urls(bound: SocketAddr) -> Vec<String> {
    let ips = if bound.ip().is_unspecified() {
        local_addresses()
    } else {
        vec![bound.ip()]
    };
    ips.into_iter()
        .map(|ip| format!("http://{}", SocketAddr::new(ip, bound.port())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_bind_lists_only_itself() {
        let urls = interface_urls("127.0.0.1:8000".parse().unwrap());
        assert_eq!(urls, vec!["http://127.0.0.1:8000".to_string()]);
    }

    #[test]
    fn unspecified_bind_includes_loopback() {
        let urls = interface_urls("0.0.0.0:8123".parse().unwrap());
        assert_eq!(urls[0], "http://127.0.0.1:8123");
        assert!(urls.iter().all(|url| url.ends_with(":8123")));
    }
}
