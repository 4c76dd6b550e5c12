//! Local address discovery and advertised URL derivation.
//!
//! When client or peer URLs are not configured explicitly, they are
//! synthesized from every usable IPv4 address bound on this host.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, SocketAddrV6};

use tracing::debug;

use crate::error::{BootstrapError, BootstrapResult};

/// Source of locally bound interface addresses.
pub trait InterfaceAddrs {
    /// List every address bound to a local interface, in kernel order.
    fn interface_addrs(&self) -> BootstrapResult<Vec<IpAddr>>;
}

/// Reads interface addresses from the operating system via `getifaddrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceAddrs for SystemInterfaces {
    fn interface_addrs(&self) -> BootstrapResult<Vec<IpAddr>> {
        let ifaddrs = nix::ifaddrs::getifaddrs().map_err(BootstrapError::AddressEnumeration)?;

        let addrs = ifaddrs
            .filter_map(|ifaddr| {
                let storage = ifaddr.address?;
                if let Some(sin) = storage.as_sockaddr_in() {
                    Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
                } else {
                    storage
                        .as_sockaddr_in6()
                        .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
                }
            })
            .collect();

        Ok(addrs)
    }
}

/// A fixed address list, for hosts whose addresses are already known.
impl InterfaceAddrs for Vec<IpAddr> {
    fn interface_addrs(&self) -> BootstrapResult<Vec<IpAddr>> {
        Ok(self.clone())
    }
}

/// Resolves and caches the usable IPv4 addresses of this host.
///
/// Enumeration happens at most once; client and peer URL derivation
/// share the cached result.
#[derive(Debug)]
pub struct AddressResolver<S = SystemInterfaces> {
    source: S,
    cached: Option<Vec<Ipv4Addr>>,
}

impl AddressResolver<SystemInterfaces> {
    /// Create a resolver backed by the host's network interfaces.
    pub fn system() -> Self {
        Self::new(SystemInterfaces)
    }
}

impl<S: InterfaceAddrs> AddressResolver<S> {
    /// Create a resolver over an arbitrary address source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: None,
        }
    }

    /// Usable IPv4 addresses: loopback or globally routable unicast.
    ///
    /// Fails with `NoAddressFound` when nothing qualifies.
    pub fn resolve(&mut self) -> BootstrapResult<&[Ipv4Addr]> {
        if self.cached.is_none() {
            let usable: Vec<Ipv4Addr> = self
                .source
                .interface_addrs()?
                .into_iter()
                .filter_map(|ip| match ip {
                    IpAddr::V4(v4) if is_usable(&v4) => Some(v4),
                    _ => None,
                })
                .collect();

            if usable.is_empty() {
                return Err(BootstrapError::NoAddressFound);
            }

            debug!(addresses = ?usable, "resolved local addresses");
            self.cached = Some(usable);
        }

        Ok(self.cached.as_deref().unwrap_or_default())
    }

    /// Advertised URLs for one traffic class.
    ///
    /// A non-empty `explicit` value is split on `,` and used verbatim.
    /// Otherwise one `http://<address>:<port>` URL is produced per
    /// resolved address.
    pub fn derive_urls(&mut self, explicit: &str, port: u16) -> BootstrapResult<Vec<String>> {
        if !explicit.is_empty() {
            return Ok(explicit.split(',').map(str::to_string).collect());
        }

        let urls = self
            .resolve()?
            .iter()
            .map(|ip| format!("http://{}", SocketAddrV4::new(*ip, port)))
            .collect();

        Ok(urls)
    }
}

/// Loopback, or a unicast address that is not link-local.
fn is_usable(ip: &Ipv4Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    !(ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() || ip.is_link_local())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::net::Ipv6Addr;

    use super::*;

    struct CountingSource {
        addrs: Vec<IpAddr>,
        calls: Cell<usize>,
    }

    impl InterfaceAddrs for CountingSource {
        fn interface_addrs(&self) -> BootstrapResult<Vec<IpAddr>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.addrs.clone())
        }
    }

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn keeps_loopback_and_unicast() {
        let mut resolver = AddressResolver::new(vec![
            v4(127, 0, 0, 1),
            v4(10, 0, 0, 7),
            v4(169, 254, 3, 4),
            v4(224, 0, 0, 1),
            v4(0, 0, 0, 0),
            v4(255, 255, 255, 255),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            v4(203, 0, 113, 9),
        ]);

        let addrs = resolver.resolve().unwrap();
        assert_eq!(
            addrs,
            &[
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 7),
                Ipv4Addr::new(203, 0, 113, 9),
            ]
        );
    }

    #[test]
    fn no_usable_address_fails() {
        let mut resolver = AddressResolver::new(vec![
            v4(169, 254, 0, 1),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ]);

        assert!(matches!(
            resolver.resolve(),
            Err(BootstrapError::NoAddressFound)
        ));
    }

    #[test]
    fn addresses_are_enumerated_once() {
        let mut resolver = AddressResolver::new(CountingSource {
            addrs: vec![v4(10, 0, 0, 1)],
            calls: Cell::new(0),
        });

        resolver.derive_urls("", 2379).unwrap();
        resolver.derive_urls("", 2380).unwrap();
        assert_eq!(resolver.source.calls.get(), 1);
    }

    #[test]
    fn derived_urls_use_port_per_address() {
        let mut resolver = AddressResolver::new(vec![v4(127, 0, 0, 1), v4(10, 0, 0, 2)]);

        let client = resolver.derive_urls("", 2379).unwrap();
        let peer = resolver.derive_urls("", 2380).unwrap();

        assert_eq!(client, ["http://127.0.0.1:2379", "http://10.0.0.2:2379"]);
        assert_eq!(peer, ["http://127.0.0.1:2380", "http://10.0.0.2:2380"]);
    }

    #[test]
    fn explicit_urls_skip_enumeration() {
        let mut resolver = AddressResolver::new(CountingSource {
            addrs: Vec::new(),
            calls: Cell::new(0),
        });

        let urls = resolver
            .derive_urls("http://a:2379,https://b:4001", 2379)
            .unwrap();
        assert_eq!(urls, ["http://a:2379", "https://b:4001"]);
        assert_eq!(resolver.source.calls.get(), 0);
    }

    #[test]
    fn system_interfaces_enumerate() {
        assert!(SystemInterfaces.interface_addrs().is_ok());
    }
}
