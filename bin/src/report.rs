//! End-of-run summary, as log lines or JSON.
use anyhow::Result;
use duet_core::prelude::*;
use serde::Serialize;

use crate::{device::DeviceReport, node::NodeReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// logical time the run stopped at
    pub now_ms: u64,
    pub nodes: Vec<NodeReport>,
    pub devices: Vec<DeviceReport>,
}

impl RunReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// devices that ended up with an address
    pub fn completed(&self) -> usize {
        self.devices.iter().filter(|d| d.completed).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn log(&self) {
        for n in &self.nodes {
            info!(
                node = %n.name,
                role = ?n.role,
                state = %n.state,
                solicits = n.counters.solicits_seen,
                advertises = n.advertises_sent,
                requests = n.counters.requests_seen,
                renews = n.counters.renews_seen,
                replies = n.replies_sent,
                processed = n.counters.solicits_seen + n.counters.requests_seen + n.counters.renews_seen,
                active_leases = n.active_leases,
                mean_response_ms = ?n.mean_response_ms,
                "server statistics"
            );
            debug!(
                node = %n.name,
                pools = ?n.pool_counters,
                malformed = n.counters.dropped_malformed,
                misrouted = n.counters.dropped_misrouted,
                inactive = n.counters.dropped_inactive,
                expired = n.counters.leases_expired,
                syncs_sent = n.syncs_sent,
                syncs_applied = n.syncs_applied,
                heartbeats_sent = n.heartbeats_sent,
                "server internals"
            );
        }
        for d in &self.devices {
            let status = if d.address.is_some() { "SUCCESS" } else { "FAILED" };
            info!(
                device = %d.name,
                device_type = %d.device_type,
                priority = d.priority,
                address = ?d.address,
                server = ?d.server_name,
                solicits = d.stats.solicits_sent,
                advertises = d.stats.advertises_received,
                requests = d.stats.requests_sent,
                replies = d.stats.replies_received,
                renews = d.stats.renews_sent,
                retries = d.stats.retries,
                status,
                "device statistics"
            );
        }
        info!(
            now_ms = self.now_ms,
            completed = self.completed(),
            devices = self.devices.len(),
            "run finished"
        );
    }
}
