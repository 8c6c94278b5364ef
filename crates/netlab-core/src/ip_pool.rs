//! Deterministic static address allocation.
//!
//! The pool hands out host addresses of a subnet in ascending order,
//! skipping the gateway and an optional reserved range that is left to the
//! engine's dynamic allocation. A name keeps its address for the lifetime of
//! the pool and the name and address maps are kept as mutual inverses, so
//! rule rendering (name to address) and chain parse-back (address to name)
//! always agree.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::debug;

use crate::error::{CoreError, Result};

/// Static address allocator for one managed subnet.
#[derive(Debug, Clone)]
pub struct IpPool {
    subnet: Ipv4Net,
    reserved: Option<Ipv4Net>,
    gateway: Ipv4Addr,
    by_name: HashMap<String, Ipv4Addr>,
    by_addr: HashMap<Ipv4Addr, String>,
    order: Vec<String>,
    /// Lowest address that may still be free. Addresses are never released,
    /// so everything below it is taken or skipped.
    cursor: u32,
}

impl IpPool {
    /// Creates a pool for `subnet`.
    ///
    /// The gateway is the configured one when given, otherwise the last host
    /// address of the subnet.
    pub fn new(
        subnet: Ipv4Net,
        reserved: Option<Ipv4Net>,
        gateway: Option<Ipv4Addr>,
    ) -> Result<Self> {
        let subnet = subnet.trunc();
        let last_host = last_host(&subnet).ok_or(CoreError::SubnetTooSmall(subnet))?;

        let gateway = match gateway {
            Some(gateway) if is_host_of(&subnet, gateway) => gateway,
            Some(gateway) => return Err(CoreError::GatewayOutsideSubnet { gateway, subnet }),
            None => last_host,
        };

        Ok(Self {
            subnet,
            reserved: reserved.map(|net| net.trunc()),
            gateway,
            by_name: HashMap::new(),
            by_addr: HashMap::new(),
            order: Vec::new(),
            cursor: u32::from(subnet.network()) + 1,
        })
    }

    /// Assigns the lowest free address to `name`.
    ///
    /// Assigning a name that already holds an address returns that address.
    pub fn assign(&mut self, name: &str) -> Result<Ipv4Addr> {
        if let Some(addr) = self.by_name.get(name) {
            return Ok(*addr);
        }

        let last = u32::from(self.subnet.broadcast());
        while self.cursor < last {
            let candidate = Ipv4Addr::from(self.cursor);
            self.cursor += 1;

            if self.is_skipped(candidate) {
                continue;
            }

            self.by_name.insert(name.to_string(), candidate);
            self.by_addr.insert(candidate, name.to_string());
            self.order.push(name.to_string());
            debug!(name = %name, address = %candidate, "Assigned address");
            return Ok(candidate);
        }

        Err(CoreError::AddressPoolExhausted {
            subnet: self.subnet,
        })
    }

    /// Returns the address held by `name`.
    pub fn address_of(&self, name: &str) -> Option<Ipv4Addr> {
        self.by_name.get(name).copied()
    }

    /// Returns the name holding `addr`.
    pub fn name_of(&self, addr: Ipv4Addr) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }

    /// Returns the managed subnet.
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// Returns the reserved dynamic range, if any.
    pub fn reserved(&self) -> Option<Ipv4Net> {
        self.reserved
    }

    /// Returns the gateway address.
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Returns `(name, address)` pairs in allocation order.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, Ipv4Addr)> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).map(|addr| (name.as_str(), *addr)))
    }

    /// Number of assigned names.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn is_skipped(&self, addr: Ipv4Addr) -> bool {
        addr == self.gateway
            || self.by_addr.contains_key(&addr)
            || self.reserved.map_or(false, |net| net.contains(&addr))
    }
}

fn last_host(subnet: &Ipv4Net) -> Option<Ipv4Addr> {
    // Needs room for the network, broadcast, gateway and one static address.
    if subnet.prefix_len() > 30 {
        return None;
    }
    Some(Ipv4Addr::from(u32::from(subnet.broadcast()) - 1))
}

fn is_host_of(subnet: &Ipv4Net, addr: Ipv4Addr) -> bool {
    subnet.contains(&addr) && addr != subnet.network() && addr != subnet.broadcast()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_assigns_ascending_from_first_host() {
        let mut pool = IpPool::new(net("10.0.0.0/28"), None, None).unwrap();
        assert_eq!(pool.gateway(), ip("10.0.0.14"));

        let assigned: Vec<Ipv4Addr> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| pool.assign(name).unwrap())
            .collect();

        assert_eq!(
            assigned,
            vec![
                ip("10.0.0.1"),
                ip("10.0.0.2"),
                ip("10.0.0.3"),
                ip("10.0.0.4"),
                ip("10.0.0.5"),
            ]
        );
    }

    #[test]
    fn test_name_keeps_its_address() {
        let mut pool = IpPool::new(net("10.0.0.0/28"), None, None).unwrap();
        let first = pool.assign("a").unwrap();
        pool.assign("b").unwrap();
        assert_eq!(pool.assign("a").unwrap(), first);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_maps_are_inverse() {
        let mut pool = IpPool::new(net("192.168.10.0/24"), None, None).unwrap();
        for name in ["seeds", "node-a", "node-b", "node-c"] {
            pool.assign(name).unwrap();
        }
        for (name, addr) in pool.assignments() {
            assert_eq!(pool.name_of(addr), Some(name));
            assert_eq!(pool.address_of(name), Some(addr));
        }
        assert_eq!(pool.name_of(ip("192.168.10.200")), None);
    }

    #[test]
    fn test_skips_reserved_range() {
        let mut pool =
            IpPool::new(net("10.0.0.0/28"), Some(net("10.0.0.0/30")), None).unwrap();
        assert_eq!(pool.assign("a").unwrap(), ip("10.0.0.4"));
        assert_eq!(pool.assign("b").unwrap(), ip("10.0.0.5"));
        assert_eq!(pool.reserved(), Some(net("10.0.0.0/30")));
    }

    #[test]
    fn test_skips_configured_gateway() {
        let mut pool = IpPool::new(net("10.0.0.0/28"), None, Some(ip("10.0.0.2"))).unwrap();
        assert_eq!(pool.gateway(), ip("10.0.0.2"));
        assert_eq!(pool.assign("a").unwrap(), ip("10.0.0.1"));
        assert_eq!(pool.assign("b").unwrap(), ip("10.0.0.3"));
    }

    // An earlier gateway default ignored the configured gateway and always
    // used the last host address. That behaviour is a bug.
    #[test]
    fn test_configured_gateway_is_not_ignored() {
        let pool = IpPool::new(net("10.0.0.0/28"), None, Some(ip("10.0.0.1"))).unwrap();
        assert_ne!(pool.gateway(), ip("10.0.0.14"));
        assert_eq!(pool.gateway(), ip("10.0.0.1"));
    }

    #[test]
    fn test_gateway_outside_subnet_rejected() {
        let err = IpPool::new(net("10.0.0.0/28"), None, Some(ip("10.0.1.1"))).unwrap_err();
        assert!(matches!(err, CoreError::GatewayOutsideSubnet { .. }));

        let err = IpPool::new(net("10.0.0.0/28"), None, Some(ip("10.0.0.15"))).unwrap_err();
        assert!(matches!(err, CoreError::GatewayOutsideSubnet { .. }));
    }

    #[test]
    fn test_exhaustion() {
        // Hosts .1-.6, gateway .6
        let mut pool = IpPool::new(net("10.0.0.0/29"), None, None).unwrap();
        for i in 0..5 {
            pool.assign(&format!("n{}", i)).unwrap();
        }
        let err = pool.assign("one-too-many").unwrap_err();
        assert!(matches!(err, CoreError::AddressPoolExhausted { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_tiny_subnet_rejected() {
        assert!(matches!(
            IpPool::new(net("10.0.0.0/31"), None, None),
            Err(CoreError::SubnetTooSmall(_))
        ));
        // /30 has two hosts: one gateway, one static address.
        let mut pool = IpPool::new(net("10.0.0.0/30"), None, None).unwrap();
        assert_eq!(pool.assign("a").unwrap(), ip("10.0.0.1"));
        assert!(pool.assign("b").is_err());
    }

    #[test]
    fn test_host_bits_truncated() {
        let pool = IpPool::new(net("10.0.0.7/28"), None, None).unwrap();
        assert_eq!(pool.subnet(), net("10.0.0.0/28"));
    }
}
