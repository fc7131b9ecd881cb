use std::{collections::HashMap, net::Ipv6Addr, time::Duration};

use duet_core::msg::{LeaseEntry, NodeId};
use tracing::debug;

/// address held by one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv6Addr,
    /// logical expiry, `None` when leases do not expire
    pub expires_at: Option<Duration>,
}

/// device -> address, one address per device, last write wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseTable {
    leases: HashMap<NodeId, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// upsert a lease that never expires, returning what it replaced
    pub fn record(&mut self, device: NodeId, address: Ipv6Addr) -> Option<Lease> {
        self.leases.insert(
            device,
            Lease {
                address,
                expires_at: None,
            },
        )
    }

    /// upsert a lease that expires at logical time `expires_at`
    pub fn record_until(
        &mut self,
        device: NodeId,
        address: Ipv6Addr,
        expires_at: Duration,
    ) -> Option<Lease> {
        self.leases.insert(
            device,
            Lease {
                address,
                expires_at: Some(expires_at),
            },
        )
    }

    pub fn get(&self, device: NodeId) -> Option<&Lease> {
        self.leases.get(&device)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// every lease, ordered by device id
    pub fn snapshot_all(&self) -> Vec<LeaseEntry> {
        let mut entries = self
            .leases
            .iter()
            .map(|(device, lease)| LeaseEntry {
                device: *device,
                address: lease.address,
                expires_at_ms: lease.expires_at.map(|t| t.as_millis() as u64),
            })
            .collect::<Vec<_>>();
        entries.sort_unstable_by_key(|e| e.device);
        entries
    }

    /// Union `entries` into the table; a received entry replaces the local
    /// one for the same device. Returns how many entries changed.
    pub fn merge(&mut self, entries: &[LeaseEntry]) -> usize {
        let mut changed = 0;
        for entry in entries {
            let lease = Lease {
                address: entry.address,
                expires_at: entry.expires_at_ms.map(Duration::from_millis),
            };
            if self.leases.insert(entry.device, lease) != Some(lease) {
                changed += 1;
            }
        }
        changed
    }

    /// Drop every lease whose expiry is at or before `now`. Freed addresses
    /// are not handed back to the pool.
    pub fn purge_expired(&mut self, now: Duration) -> Vec<(NodeId, Ipv6Addr)> {
        let mut purged = Vec::new();
        self.leases.retain(|device, lease| match lease.expires_at {
            Some(t) if t <= now => {
                purged.push((*device, lease.address));
                false
            }
            _ => true,
        });
        purged.sort_unstable();
        if !purged.is_empty() {
            debug!(count = purged.len(), ?now, "purged expired leases");
        }
        purged
    }
}
