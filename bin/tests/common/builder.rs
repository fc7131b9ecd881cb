use std::time::Duration;

use anyhow::Result;
use config::{ClusterConfig, DeviceConfig};
use duet_bin::{Cluster, Device};
use duet_core::msg::{DeviceType, NodeId};

pub const PRIMARY: &str = "dhcp-primary";
pub const BACKUP: &str = "dhcp-backup";

/// cluster yaml with the usual pools and timings; tweak fields then `build`
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub cutoff: i32,
    pub backup: bool,
    pub fail_at_ms: Option<u64>,
    pub lease_expiry: bool,
    pub lease_vip: &'static str,
    pub lease_normal: &'static str,
    pub sweep: u32,
    pub spacing_ms: u64,
    pub retry_after_ms: Option<u64>,
    pub max_retries: u32,
    /// (name, type, priority, renew)
    pub devices: Vec<(&'static str, &'static str, i32, bool)>,
    pub run_for_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cutoff: 8,
            backup: true,
            fail_at_ms: None,
            lease_expiry: false,
            lease_vip: "24h",
            lease_normal: "1h",
            sweep: 60,
            spacing_ms: 300,
            retry_after_ms: None,
            max_retries: 0,
            devices: Vec::new(),
            run_for_ms: 10_000,
        }
    }
}

impl ClusterSettings {
    pub fn yaml(&self) -> String {
        let fail_at = self
            .fail_at_ms
            .map(|ms| format!("\n    fail_at_ms: {ms}"))
            .unwrap_or_default();
        let backup = if self.backup {
            "\n  - name: dhcp-backup\n    role: backup"
        } else {
            ""
        };
        let devices = if self.devices.is_empty() {
            "devices: []".to_owned()
        } else {
            let mut s = "devices:".to_owned();
            for (name, ty, prio, renew) in &self.devices {
                s.push_str(&format!(
                    "\n  - name: {name}\n    type: {ty}\n    priority: {prio}\n    renew: {renew}"
                ));
            }
            s
        };
        let retry = self
            .retry_after_ms
            .map(|ms| format!("\n  retry_after_ms: {ms}"))
            .unwrap_or_default();
        format!(
            r#"
pools:
  pc: "2001:db8:1::/64"
  mobile: "2001:db8:2::/64"
  printer: "2001:db8:3::/64"
  vip: "2001:db8:f::/64"
response:
  fast_delay_ms: 10
  normal_delay_ms: 50
vip_priority_cutoff: {cutoff}
lease_time:
  vip: "{vip}"
  normal: "{normal}"
lease_expiry: {expiry}
lease_sweep_interval: {sweep}
failover:
  sync_interval_ms: 1000
  heartbeat_interval_ms: 250
  failover_timeout_ms: 1000
link_delay_ms: 1
nodes:
  - name: dhcp-primary
    role: primary{fail_at}{backup}
{devices}
device_policy:
  start_spacing_ms: {spacing}{retry}
  max_retries: {max_retries}
run_for_ms: {run_for}
"#,
            cutoff = self.cutoff,
            vip = self.lease_vip,
            normal = self.lease_normal,
            expiry = self.lease_expiry,
            sweep = self.sweep,
            spacing = self.spacing_ms,
            max_retries = self.max_retries,
            run_for = self.run_for_ms,
        )
    }

    pub fn config(&self) -> Result<ClusterConfig> {
        ClusterConfig::parse_str(self.yaml())
    }

    pub fn build(&self) -> Result<Cluster> {
        Cluster::build(&self.config()?)
    }
}

/// attach a device that boots at an exact logical time
pub fn add_device_at(
    cluster: &mut Cluster,
    id: u32,
    name: &str,
    device_type: DeviceType,
    priority: i32,
    start_at: Duration,
) -> Result<NodeId> {
    let cfg = DeviceConfig {
        name: name.to_owned(),
        id: NodeId(id),
        device_type,
        priority,
        start_at,
        retry: None,
        renew: false,
    };
    cluster
        .world_mut()
        .add(Device::new(cfg, Duration::from_millis(1)))
}

pub fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
