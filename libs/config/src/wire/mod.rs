use std::{num::NonZeroU32, time::Duration};

use anyhow::{Context, Result};
use duet_core::msg::DeviceType;
use ipnet::Ipv6Net;
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::LeaseTime;

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    pub pools: Pools,
    #[serde(default)]
    pub response: ResponseDelay,
    #[serde(default = "default_vip_priority_cutoff")]
    pub vip_priority_cutoff: i32,
    #[serde(default)]
    pub lease_time: LeaseTimes,
    #[serde(default)]
    pub lease_expiry: bool,
    #[serde(
        default = "default_lease_sweep_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub lease_sweep_interval: NonZeroU32,
    pub failover: Option<Failover>,
    #[serde(default = "default_link_delay_ms")]
    pub link_delay_ms: u64,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub device_policy: DevicePolicy,
    #[serde(default = "default_run_for_ms")]
    pub run_for_ms: u64,
}

/// one IPv6 prefix per device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pools {
    pub pc: Ipv6Net,
    pub mobile: Ipv6Net,
    pub printer: Ipv6Net,
    pub vip: Ipv6Net,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResponseDelay {
    #[serde(default = "default_fast_delay_ms")]
    pub fast_delay_ms: u64,
    #[serde(default = "default_normal_delay_ms")]
    pub normal_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LeaseTimes {
    #[serde(deserialize_with = "deserialize_duration")]
    pub vip: NonZeroU32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub normal: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Failover {
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_failover_timeout_ms")]
    pub failover_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Node {
    pub name: String,
    pub role: Role,
    /// logical time (ms) at which this node crashes
    pub fail_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Device {
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// renew at half the lease time, needs `lease_expiry`
    #[serde(default)]
    pub renew: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DevicePolicy {
    #[serde(default = "default_start_spacing_ms")]
    pub start_spacing_ms: u64,
    /// re-SOLICIT if no REPLY arrived within this many ms
    pub retry_after_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
}

pub const fn default_vip_priority_cutoff() -> i32 {
    8
}

pub const fn default_fast_delay_ms() -> u64 {
    10
}

pub const fn default_normal_delay_ms() -> u64 {
    50
}

pub const fn default_link_delay_ms() -> u64 {
    1
}

pub const fn default_run_for_ms() -> u64 {
    10_000
}

pub const fn default_sync_interval_ms() -> u64 {
    1_000
}

pub const fn default_heartbeat_interval_ms() -> u64 {
    250
}

pub const fn default_failover_timeout_ms() -> u64 {
    1_000
}

pub const fn default_start_spacing_ms() -> u64 {
    300
}

pub const fn default_priority() -> i32 {
    duet_core::msg::DEFAULT_PRIORITY
}

pub fn default_lease_sweep_interval() -> NonZeroU32 {
    NonZeroU32::new(60).unwrap() // 1 minute
}

impl Default for ResponseDelay {
    fn default() -> Self {
        Self {
            fast_delay_ms: default_fast_delay_ms(),
            normal_delay_ms: default_normal_delay_ms(),
        }
    }
}

impl Default for LeaseTimes {
    fn default() -> Self {
        Self {
            vip: NonZeroU32::new(86400).unwrap(),   // 24 hours
            normal: NonZeroU32::new(3600).unwrap(), // 1 hour
        }
    }
}

impl Default for Failover {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            failover_timeout_ms: default_failover_timeout_ms(),
        }
    }
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self {
            start_spacing_ms: default_start_spacing_ms(),
            retry_after_ms: None,
            max_retries: 0,
        }
    }
}

impl From<LeaseTimes> for LeaseTime {
    fn from(lease_time: LeaseTimes) -> Self {
        LeaseTime::new(
            Duration::from_secs(lease_time.vip.get() as u64),
            Duration::from_secs(lease_time.normal.get() as u64),
        )
    }
}

/// Parse a duration string with optional time units
/// Accepts: "3600", "3600s", "60m", "24h"
/// If no unit is specified, assumes seconds
fn parse_duration(s: &str) -> Result<u32> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::Error::msg("empty duration string"));
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u32>().context("invalid number")?;

    let num_seconds = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', or 's' are supported",
            other
        ),
    };

    num.checked_mul(num_seconds)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LeaseDuration {
    Seconds(u64),
    String(String),
}

impl LeaseDuration {
    fn into_nonzero<E: de::Error>(self) -> Result<NonZeroU32, E> {
        match self {
            LeaseDuration::Seconds(val) => NonZeroU32::new(
                u32::try_from(val).map_err(|_| E::custom("duration value too large"))?,
            )
            .ok_or_else(|| E::custom("duration cannot be zero")),
            LeaseDuration::String(s) => NonZeroU32::new(parse_duration(&s).map_err(E::custom)?)
                .ok_or_else(|| E::custom("duration cannot be zero")),
        }
    }
}

fn deserialize_duration<'de, D>(de: D) -> Result<NonZeroU32, D::Error>
where
    D: Deserializer<'de>,
{
    LeaseDuration::deserialize(de)?.into_nonzero()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub static EXAMPLE: &str = include_str!("../../../../example.yaml");

    // test we can encode/decode example file
    #[test]
    fn test_example() {
        let cfg: crate::wire::Config = serde_yaml::from_str(EXAMPLE).unwrap();
        assert_eq!(cfg.nodes.len(), 2);
        assert!(cfg.failover.is_some());
        // back to the yaml
        let s = serde_yaml::to_string(&cfg).unwrap();
        let again: crate::wire::Config = serde_yaml::from_str(&s).unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3600s").unwrap(), 3600);
        assert_eq!(parse_duration("60").unwrap(), 60);
        assert_eq!(parse_duration("90m").unwrap(), 5400);
        assert_eq!(parse_duration("24h").unwrap(), 86400);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
        assert!(parse_duration("60d").is_err());
        assert!(parse_duration("60mins").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn test_defaults() {
        let json = r#"{
            "pools": {
                "pc": "2001:db8:1::/64",
                "mobile": "2001:db8:2::/64",
                "printer": "2001:db8:3::/64",
                "vip": "2001:db8:f::/64"
            },
            "nodes": [{"name": "solo", "role": "primary"}]
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.vip_priority_cutoff, 8);
        assert_eq!(cfg.response, ResponseDelay::default());
        assert_eq!(cfg.lease_time.normal.get(), 3600);
        assert_eq!(cfg.lease_sweep_interval.get(), 60);
        assert_eq!(cfg.device_policy.start_spacing_ms, 300);
        assert!(cfg.failover.is_none());
        assert!(!cfg.lease_expiry);
    }

    #[test]
    fn test_lease_time_strings() {
        let json = r#"{"vip": "1h", "normal": "20m"}"#;
        let lt: LeaseTimes = serde_json::from_str(json).unwrap();
        assert_eq!(lt.vip.get(), 3600);
        assert_eq!(lt.normal.get(), 1200);
        assert!(serde_json::from_str::<LeaseTimes>(r#"{"vip": 0, "normal": 1}"#).is_err());
    }

    #[test]
    fn test_device_type_fallback() {
        let d: Device = serde_json::from_str(r#"{"name": "d", "type": "toaster"}"#).unwrap();
        assert_eq!(d.device_type, DeviceType::Unknown);
        assert_eq!(d.priority, 1);
    }
}
