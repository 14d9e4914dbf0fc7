//! Multicast socket plumbing for the bridge interface.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket as StdUdpSocket};

use tokio::net::UdpSocket;
use tracing::warn;

/// Bind a listener for one multicast group on the bridge interface.
pub fn join_group(group: SocketAddrV4, bridge_ip: Option<Ipv4Addr>) -> io::Result<UdpSocket> {
    let sock = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port()))?;
    sock.join_multicast_v4(group.ip(), &bridge_ip.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
    sock.set_nonblocking(true)?;
    UdpSocket::from_std(sock)
}

/// Build the socket used for downstream sends. Loopback is disabled so our
/// own emissions never re-enter the ingress path.
pub fn downstream_sender(bridge_ip: Option<Ipv4Addr>) -> io::Result<UdpSocket> {
    let sock = StdUdpSocket::bind((bridge_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0))?;
    sock.set_multicast_loop_v4(false)?;
    sock.set_multicast_ttl_v4(2)?;
    sock.set_nonblocking(true)?;
    UdpSocket::from_std(sock)
}

/// The set of IPv4 addresses attached to local interfaces, used to tell
/// locally-originated datagrams from remote ones.
///
/// Collected once at startup by parsing `ip -4 -o addr`; the bridge address
/// and loopback are always included even if the tool is unavailable.
pub fn local_addresses(bridge_ip: Option<Ipv4Addr>) -> HashSet<Ipv4Addr> {
    let mut addrs: HashSet<Ipv4Addr> = HashSet::new();
    addrs.insert(Ipv4Addr::LOCALHOST);
    if let Some(ip) = bridge_ip {
        addrs.insert(ip);
    }

    match std::process::Command::new("ip").args(["-4", "-o", "addr"]).output() {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout);
            for addr in parse_ip_addr_output(&text) {
                addrs.insert(addr);
            }
        }
        Ok(output) => {
            warn!(status = %output.status, "ip addr listing failed; using configured addresses only");
        }
        Err(e) => {
            warn!(error = %e, "ip tool unavailable; using configured addresses only");
        }
    }
    addrs
}

/// Pull the address out of each `ip -4 -o addr` row:
///
/// ```text
/// 4: br0    inet 10.0.0.1/24 brd 10.0.0.255 scope global br0
/// ```
pub fn parse_ip_addr_output(text: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for line in text.lines() {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word == "inet" {
                if let Some(cidr) = words.next() {
                    if let Some(addr) = cidr.split('/').next().and_then(|a| a.parse().ok()) {
                        addrs.push(addr);
                    }
                }
                break;
            }
        }
    }
    addrs
}

/// Whether a datagram source is one of our own addresses.
pub fn is_local_source(src: &IpAddr, local: &HashSet<Ipv4Addr>) -> bool {
    match src {
        IpAddr::V4(v4) => local.contains(v4),
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_addr_rows() {
        let text = "\
1: lo    inet 127.0.0.1/8 scope host lo
4: br0    inet 10.0.0.1/24 brd 10.0.0.255 scope global br0
5: wlan0    inet 192.168.1.7/24 scope global dynamic wlan0
";
        let addrs = parse_ip_addr_output(text);
        assert_eq!(
            addrs,
            vec![
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(192, 168, 1, 7),
            ]
        );
    }

    #[test]
    fn parser_skips_rows_without_inet() {
        assert!(parse_ip_addr_output("3: eth0 link/ether aa:bb:cc:dd:ee:ff").is_empty());
        assert!(parse_ip_addr_output("").is_empty());
    }

    #[test]
    fn local_source_check() {
        let mut local = HashSet::new();
        local.insert(Ipv4Addr::new(10, 0, 0, 1));

        assert!(is_local_source(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), &local));
        assert!(!is_local_source(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), &local));
        assert!(!is_local_source(&"::1".parse().unwrap(), &local));
    }

    #[test]
    fn bridge_ip_is_always_local() {
        let local = local_addresses(Some(Ipv4Addr::new(10, 9, 8, 7)));
        assert!(local.contains(&Ipv4Addr::new(10, 9, 8, 7)));
        assert!(local.contains(&Ipv4Addr::LOCALHOST));
    }
}
