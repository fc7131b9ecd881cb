use std::{net::Ipv6Addr, time::Duration};

use config::{LeaseTime, PoolPrefixes, ServerConfig};
use duet_core::msg::{DeviceType, PoolCounters, PoolId};
use ipnet::Ipv6Net;
use tracing::{debug, trace};

use crate::PoolError;

/// Per-class counter allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPool {
    prefixes: PoolPrefixes,
    counters: PoolCounters,
    vip_priority_cutoff: i32,
    lease_time: LeaseTime,
}

impl AddressPool {
    /// every counter starts at 1
    pub fn new(prefixes: PoolPrefixes, vip_priority_cutoff: i32, lease_time: LeaseTime) -> Self {
        Self {
            prefixes,
            counters: PoolCounters::default(),
            vip_priority_cutoff,
            lease_time,
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(*cfg.pools(), cfg.vip_priority_cutoff(), cfg.lease_time())
    }

    /// Take the next address of `pool`. Counters are never handed out twice,
    /// so a counter that cannot advance leaves the pool exhausted.
    pub fn allocate(&mut self, pool: PoolId) -> Result<Ipv6Addr, PoolError> {
        let counter = self.counters.get_mut(pool);
        let next = counter.checked_add(1).ok_or(PoolError::Exhausted(pool))?;
        let addr = make_address(self.prefixes.get(pool), *counter);
        *counter = next;
        trace!(%pool, %addr, next, "allocated");
        Ok(addr)
    }

    /// servers, routers and anything at or above the cutoff
    pub fn is_vip(&self, device_type: DeviceType, priority: i32) -> bool {
        matches!(device_type, DeviceType::Server | DeviceType::Router)
            || priority >= self.vip_priority_cutoff
    }

    /// pool a client draws from
    pub fn classify(&self, device_type: DeviceType, priority: i32) -> PoolId {
        if self.is_vip(device_type, priority) {
            return PoolId::Vip;
        }
        match device_type {
            DeviceType::Mobile => PoolId::Mobile,
            DeviceType::Printer => PoolId::Printer,
            _ => PoolId::Pc,
        }
    }

    pub fn lease_duration(&self, pool: PoolId) -> Duration {
        self.lease_time.for_pool(pool)
    }

    /// Which pool `addr` was drawn from. VIP is checked first.
    pub fn pool_of(&self, addr: Ipv6Addr) -> Result<PoolId, PoolError> {
        [PoolId::Vip, PoolId::Pc, PoolId::Mobile, PoolId::Printer]
            .into_iter()
            .find(|pool| self.prefixes.get(*pool).contains(&addr))
            .ok_or(PoolError::Unpooled(addr))
    }

    pub fn counters(&self) -> PoolCounters {
        self.counters
    }

    pub fn next_counter(&self, pool: PoolId) -> u64 {
        self.counters.get(pool)
    }

    /// Raise every local counter to at least the received one. Returns true
    /// if anything moved.
    pub fn merge_counters(&mut self, received: &PoolCounters) -> bool {
        let mut changed = false;
        for pool in PoolId::ALL {
            let local = self.counters.get_mut(pool);
            let theirs = received.get(pool);
            if theirs > *local {
                debug!(%pool, from = *local, to = theirs, "counter advanced by sync");
                *local = theirs;
                changed = true;
            }
        }
        changed
    }
}

/// network base of `prefix` plus `counter`
pub fn make_address(prefix: Ipv6Net, counter: u64) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(prefix.network()).wrapping_add(counter as u128))
}
