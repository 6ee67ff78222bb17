use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{MeshLabError, Result};

/// IPv4 network the mesh interfaces are numbered from.
///
/// Kept as a base/mask pair so scenario files read like the ns-3 address
/// helper. All address math goes through [`Ipv4Network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Subnet {
    pub base: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl Default for Ipv4Subnet {
    fn default() -> Self {
        Self {
            base: Ipv4Addr::new(192, 168, 1, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

impl Ipv4Subnet {
    /// The network this base/mask pair describes. Fails on a non-contiguous
    /// mask or a base with host bits set.
    pub fn network(&self) -> Result<Ipv4Network> {
        let network = Ipv4Network::with_netmask(self.base, self.mask).map_err(|e| {
            MeshLabError::config(format!("subnet {self} is not a valid network: {e}"))
        })?;
        if network.network() != self.base {
            return Err(MeshLabError::config(format!(
                "subnet base {} has host bits set under /{}",
                self.base,
                network.prefix()
            )));
        }
        Ok(network)
    }

    pub fn validate(&self) -> Result<()> {
        self.network().map(|_| ())
    }

    /// Number of assignable host addresses, excluding network and broadcast.
    pub fn host_capacity(&self) -> Result<u64> {
        Ok(u64::from(self.network()?.size()).saturating_sub(2))
    }

    /// Address handed to the `index`-th interface, counting from `.1`.
    pub fn host(&self, index: usize) -> Result<Ipv4Addr> {
        let no_room =
            || MeshLabError::config(format!("subnet {self} has no room for host #{index}"));
        if index as u64 >= self.host_capacity()? {
            return Err(no_room());
        }
        let offset = u32::try_from(index + 1).map_err(|_| no_room())?;
        self.network()?.nth(offset).ok_or_else(no_room)
    }

    pub fn broadcast(&self) -> Result<Ipv4Addr> {
        Ok(self.network()?.broadcast())
    }

    /// True when every host bit of `addr` under this subnet's mask is set.
    /// The limited broadcast address `255.255.255.255` also matches.
    pub fn is_directed_broadcast(&self, addr: Ipv4Addr) -> bool {
        let host_bits = !u32::from(self.mask);
        if host_bits == 0 {
            return false;
        }
        u32::from(addr) & host_bits == host_bits
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::Ipv4Subnet;
    use std::net::Ipv4Addr;

    fn subnet(base: [u8; 4], mask: [u8; 4]) -> Ipv4Subnet {
        Ipv4Subnet {
            base: Ipv4Addr::from(base),
            mask: Ipv4Addr::from(mask),
        }
    }

    #[test]
    fn default_subnet_matches_mesh_numbering() {
        let subnet = Ipv4Subnet::default();
        assert_eq!(subnet.host(0).unwrap(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(subnet.host(24).unwrap(), Ipv4Addr::new(192, 168, 1, 25));
        assert_eq!(subnet.host(253).unwrap(), Ipv4Addr::new(192, 168, 1, 254));
        assert_eq!(subnet.broadcast().unwrap(), Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(subnet.host_capacity().unwrap(), 254);
        assert!(subnet.host(254).is_err());
        assert_eq!(subnet.network().unwrap().prefix(), 24);
    }

    #[test]
    fn wider_prefix_numbers_across_octets() {
        let subnet = subnet([10, 1, 0, 0], [255, 255, 0, 0]);
        assert_eq!(subnet.host(255).unwrap(), Ipv4Addr::new(10, 1, 1, 0));
        assert_eq!(subnet.broadcast().unwrap(), Ipv4Addr::new(10, 1, 255, 255));
        assert_eq!(subnet.host_capacity().unwrap(), 65_534);
    }

    #[test]
    fn point_to_point_prefix_has_no_hosts() {
        let subnet = subnet([10, 0, 0, 8], [255, 255, 255, 254]);
        assert_eq!(subnet.host_capacity().unwrap(), 0);
        assert!(subnet.host(0).is_err());
    }

    #[test]
    fn directed_broadcast_detection() {
        let subnet = Ipv4Subnet::default();
        assert!(subnet.is_directed_broadcast(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(subnet.is_directed_broadcast(Ipv4Addr::BROADCAST));
        assert!(!subnet.is_directed_broadcast(Ipv4Addr::new(192, 168, 1, 7)));
        assert!(!subnet.is_directed_broadcast(Ipv4Addr::new(192, 168, 1, 0)));
    }

    #[test]
    fn rejects_malformed_subnets() {
        assert!(subnet([10, 0, 0, 0], [255, 0, 255, 0]).validate().is_err());
        assert!(subnet([10, 0, 0, 1], [255, 255, 255, 0]).validate().is_err());
        assert!(subnet([10, 0, 0, 0], [255, 255, 0, 0]).validate().is_ok());
    }
}
