use std::net::IpAddr;

/// Addresses a hostname resolved to, split by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsRecords {
    pub ipv4: Vec<IpAddr>,
    pub ipv6: Vec<IpAddr>,
}

impl DnsRecords {
    pub fn from_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut records = Self::default();
        for addr in addrs {
            let list = if addr.is_ipv4() {
                &mut records.ipv4
            } else {
                &mut records.ipv6
            };
            if !list.contains(&addr) {
                list.push(addr);
            }
        }
        records
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Pick an address, falling back to the other family when the preferred
    /// one has no records.
    pub fn get(&self, prefer_ipv6: bool) -> Option<IpAddr> {
        let (first, second) = if prefer_ipv6 {
            (&self.ipv6, &self.ipv4)
        } else {
            (&self.ipv4, &self.ipv6)
        };
        first.first().or_else(|| second.first()).copied()
    }
}
