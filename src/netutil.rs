//! Interface enumeration, network membership and endpoint id generation.

use std::ffi::CStr;
use std::net::Ipv4Addr;

use rand::Rng;
use tracing::trace;

use crate::error::Error;

/// Length of every endpoint identifier, in bytes.
pub const ENDPOINT_ID_LEN: usize = 256;

const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A local network interface with an IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetIface {
    /// Interface name, e.g. `lo` or `eth0`.
    pub name: String,
    /// CIDR address string, e.g. `127.0.0.1/8`.
    pub addr: String,
}

/// Enumerates the local network interfaces that carry an IPv4 address.
///
/// Interfaces without an address (or with only non-IPv4 addresses) are
/// skipped. The `addr` of each result is a CIDR string whose prefix length
/// is derived from the interface netmask.
pub fn local_interfaces() -> Result<Vec<NetIface>, Error> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut interfaces = Vec::new();
    let mut cur = ifap;
    while !cur.is_null() {
        // SAFETY: cur is a node of the list getifaddrs() handed us; it stays
        // valid until freeifaddrs() below.
        let ifa = unsafe { &*cur };
        cur = ifa.ifa_next;

        if ifa.ifa_addr.is_null() {
            continue;
        }
        let family = unsafe { (*ifa.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }

        let sockaddr = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sockaddr.sin_addr.s_addr));

        let prefix = if ifa.ifa_netmask.is_null() {
            32
        } else {
            let mask = unsafe { &*(ifa.ifa_netmask as *const libc::sockaddr_in) };
            u32::from_be(mask.sin_addr.s_addr).count_ones()
        };

        let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
            .to_string_lossy()
            .into_owned();

        trace!(%name, %ip, prefix, "found interface");
        interfaces.push(NetIface {
            name,
            addr: format!("{ip}/{prefix}"),
        });
    }

    unsafe { libc::freeifaddrs(ifap) };

    Ok(interfaces)
}

/// Checks whether `ip` belongs to the network advertised by the CIDR string
/// `ipnet` (an interface address such as `192.168.1.3/24`).
///
/// Membership for the common home/loopback prefixes is octet-based: `/8`
/// compares the first three octets, `/16` the first two and `/24` only the
/// first. Any other prefix uses exact mask membership.
pub fn same_network(ip: &str, ipnet: &str) -> bool {
    let Some((net, prefix)) = ipnet.rsplit_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    let (Ok(ip), Ok(net)) = (ip.parse::<Ipv4Addr>(), net.parse::<Ipv4Addr>()) else {
        return false;
    };

    match prefix {
        8 => ip.octets()[..3] == net.octets()[..3],
        16 => ip.octets()[..2] == net.octets()[..2],
        24 => ip.octets()[0] == net.octets()[0],
        prefix if prefix <= 32 => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            u32::from(ip) & mask == u32::from(net) & mask
        }
        _ => false,
    }
}

/// Generates a 256-character endpoint identifier.
///
/// The first character is a decimal digit, the rest are uniformly drawn
/// alphanumerics. Uniqueness is the caller's concern; the engine rechecks
/// against its endpoint map and draws again on collision.
pub fn generate_id<R: Rng>(rng: &mut R) -> String {
    let mut buf = Vec::with_capacity(ENDPOINT_ID_LEN);
    buf.push(DIGITS[rng.gen_range(0..DIGITS.len())]);
    for _ in 1..ENDPOINT_ID_LEN {
        buf.push(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]);
    }
    String::from_utf8(buf).expect("id alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_network_membership() {
        let cases = [
            ("127.0.0.1", "127.0.0.1/8", true),
            ("192.168.1.2", "192.168.1.3/8", true),
            ("10.0.1.4", "10.0.0.4/16", true),
            ("10.0.1.4", "10.1.0.4/24", true),
            ("192.168.1.1", "10.0.0.4/24", false),
            ("127.0.0.1", "127.0.1.1/8", false),
            ("10.1.0.4", "10.0.0.4/16", false),
            ("11.0.1.4", "10.0.1.4/24", false),
        ];
        for (ip, ipnet, expected) in cases {
            assert_eq!(
                same_network(ip, ipnet),
                expected,
                "same_network({ip}, {ipnet})"
            );
        }
    }

    #[test]
    fn same_network_rejects_garbage() {
        assert!(!same_network("10.0.0.1", "10.0.0.1"));
        assert!(!same_network("not-an-ip", "10.0.0.0/8"));
        assert!(!same_network("10.0.0.1", "10.0.0.0/33"));
    }

    #[test]
    fn same_network_uncommon_prefix_uses_mask() {
        assert!(same_network("10.0.0.130", "10.0.0.129/25"));
        assert!(!same_network("10.0.0.1", "10.0.0.129/25"));
    }

    #[test]
    fn generated_ids_have_the_right_shape() {
        let mut rng = rand::thread_rng();
        let id = generate_id(&mut rng);

        assert_eq!(id.len(), ENDPOINT_ID_LEN);
        assert!(id.as_bytes()[0].is_ascii_digit());
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));

        // Two draws colliding would mean the RNG is broken.
        assert_ne!(id, generate_id(&mut rng));
    }

    #[test]
    fn local_interfaces_reports_loopback() {
        let interfaces = local_interfaces().unwrap();
        assert!(
            !interfaces.is_empty(),
            "expected at least a loopback interface"
        );
        for iface in &interfaces {
            let (ip, prefix) = iface.addr.rsplit_once('/').expect("CIDR-shaped address");
            ip.parse::<std::net::Ipv4Addr>().expect("IPv4 address");
            assert!(prefix.parse::<u32>().expect("prefix length") <= 32);
        }
    }
}
