use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use duet_core::msg::{DeviceType, NodeId, PoolId};
use ipnet::Ipv6Net;
use tracing::debug;

pub mod wire;

pub use wire::Role;

/// id of the first server; devices are numbered after the servers
const FIRST_NODE_ID: u32 = 1;

const MAX_POOL_PREFIX_LEN: u8 = 64;

/// highest priority that still gets a start delay
const START_PRIORITY_CEILING: i32 = 11;

/// cluster config: every server and device in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    servers: Vec<ServerConfig>,
    devices: Vec<DeviceConfig>,
    link_delay: Duration,
    run_for: Duration,
    path: Option<PathBuf>,
}

impl ClusterConfig {
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::parse_str(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let s = s.as_ref();
        let cfg: wire::Config = match serde_json::from_str(s) {
            Ok(cfg) => cfg,
            Err(_) => serde_yaml::from_str(s).context("config is neither valid JSON nor YAML")?,
        };
        let config = Self::try_from(cfg)?;
        debug!(?config);
        Ok(config)
    }

    pub fn servers(&self) -> &[ServerConfig] {
        &self.servers
    }
    pub fn devices(&self) -> &[DeviceConfig] {
        &self.devices
    }
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
    /// propagation delay applied to every frame
    pub fn link_delay(&self) -> Duration {
        self.link_delay
    }
    pub fn run_for(&self) -> Duration {
        self.run_for
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl TryFrom<wire::Config> for ClusterConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        let pools = PoolPrefixes::try_from(cfg.pools)?;
        let failover = validate_nodes(&cfg.nodes, cfg.failover)?;

        let mut names = HashSet::new();
        for name in cfg
            .nodes
            .iter()
            .map(|n| &n.name)
            .chain(cfg.devices.iter().map(|d| &d.name))
        {
            if !names.insert(name.as_str()) {
                bail!("duplicate endpoint name {name:?}");
            }
        }

        let lease_expiry = cfg
            .lease_expiry
            .then(|| Duration::from_secs(cfg.lease_sweep_interval.get() as u64));
        let link_delay = Duration::from_millis(cfg.link_delay_ms);

        let mut ids = (FIRST_NODE_ID..).map(NodeId);
        let server_ids = cfg
            .nodes
            .iter()
            .map(|n| (n.role, ids.next().unwrap_or(NodeId(u32::MAX))))
            .collect::<Vec<_>>();
        let partner_of = |role: Role| {
            server_ids
                .iter()
                .find(|(r, _)| *r != role)
                .map(|(_, id)| *id)
        };

        let servers = cfg
            .nodes
            .iter()
            .zip(server_ids.iter())
            .map(|(node, (role, id))| ServerConfig {
                name: node.name.clone(),
                id: *id,
                role: *role,
                partner: partner_of(*role),
                pools,
                fast_delay: Duration::from_millis(cfg.response.fast_delay_ms),
                normal_delay: Duration::from_millis(cfg.response.normal_delay_ms),
                vip_priority_cutoff: cfg.vip_priority_cutoff,
                lease_time: cfg.lease_time.into(),
                lease_expiry,
                failover: failover.filter(|_| server_ids.len() == 2),
                fail_at: node.fail_at_ms.map(Duration::from_millis),
                link_delay,
            })
            .collect::<Vec<_>>();

        let policy = cfg.device_policy;
        if policy.max_retries > 0 && policy.retry_after_ms.is_none() {
            bail!("device_policy.max_retries needs retry_after_ms");
        }
        let retry = match policy.retry_after_ms {
            Some(0) => bail!("device_policy.retry_after_ms must be greater than zero"),
            Some(ms) => Some(RetryPolicy {
                after: Duration::from_millis(ms),
                max_retries: policy.max_retries,
            }),
            None => None,
        };
        let spacing = Duration::from_millis(policy.start_spacing_ms);

        let devices = cfg
            .devices
            .iter()
            .map(|d| {
                if d.renew && !cfg.lease_expiry {
                    bail!("device {:?} renews but lease_expiry is off", d.name);
                }
                Ok(DeviceConfig {
                    name: d.name.clone(),
                    id: ids.next().context("ran out of endpoint ids")?,
                    device_type: d.device_type,
                    priority: d.priority,
                    start_at: start_delay(d.priority, spacing),
                    retry,
                    renew: d.renew,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            servers,
            devices,
            link_delay,
            run_for: Duration::from_millis(cfg.run_for_ms),
            path: None,
        })
    }
}

/// at most one primary and one backup; a backup needs a primary. Returns the
/// failover timing to use when both are present
fn validate_nodes(nodes: &[wire::Node], failover: Option<wire::Failover>) -> Result<Option<FailoverTiming>> {
    let primaries = nodes.iter().filter(|n| n.role == Role::Primary).count();
    let backups = nodes.iter().filter(|n| n.role == Role::Backup).count();
    match (primaries, backups) {
        (0, _) => bail!("config needs exactly one primary node"),
        (1, 0) | (1, 1) => {}
        (1, _) => bail!("only one backup node is supported, found {backups}"),
        (n, _) => bail!("only one primary node is supported, found {n}"),
    }
    if backups == 0 {
        return Ok(None);
    }
    FailoverTiming::try_from(failover.unwrap_or_default()).map(Some)
}

/// priority 10 and up start immediately, each step below waits one `spacing` more
pub fn start_delay(priority: i32, spacing: Duration) -> Duration {
    let steps = (START_PRIORITY_CEILING.saturating_sub(priority)).max(1) - 1;
    spacing.saturating_mul(steps as u32)
}

/// per-node server config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    name: String,
    id: NodeId,
    role: Role,
    partner: Option<NodeId>,
    pools: PoolPrefixes,
    fast_delay: Duration,
    normal_delay: Duration,
    vip_priority_cutoff: i32,
    lease_time: LeaseTime,
    lease_expiry: Option<Duration>,
    failover: Option<FailoverTiming>,
    fail_at: Option<Duration>,
    link_delay: Duration,
}

impl ServerConfig {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn id(&self) -> NodeId {
        self.id
    }
    pub fn role(&self) -> Role {
        self.role
    }
    /// the other server, when replicated
    pub fn partner(&self) -> Option<NodeId> {
        self.partner
    }
    pub fn pools(&self) -> &PoolPrefixes {
        &self.pools
    }
    /// delay before answering a VIP client
    pub fn fast_delay(&self) -> Duration {
        self.fast_delay
    }
    /// delay before answering everyone else
    pub fn normal_delay(&self) -> Duration {
        self.normal_delay
    }
    pub fn vip_priority_cutoff(&self) -> i32 {
        self.vip_priority_cutoff
    }
    pub fn lease_time(&self) -> LeaseTime {
        self.lease_time
    }
    /// sweep interval, when leases expire at all
    pub fn lease_expiry(&self) -> Option<Duration> {
        self.lease_expiry
    }
    pub fn failover(&self) -> Option<FailoverTiming> {
        self.failover
    }
    pub fn fail_at(&self) -> Option<Duration> {
        self.fail_at
    }
    pub fn link_delay(&self) -> Duration {
        self.link_delay
    }
    /// standalone server builder, mostly for tests
    pub fn standalone(name: impl Into<String>, id: NodeId, pools: PoolPrefixes) -> Self {
        Self {
            name: name.into(),
            id,
            role: Role::Primary,
            partner: None,
            pools,
            fast_delay: Duration::from_millis(wire::default_fast_delay_ms()),
            normal_delay: Duration::from_millis(wire::default_normal_delay_ms()),
            vip_priority_cutoff: wire::default_vip_priority_cutoff(),
            lease_time: wire::LeaseTimes::default().into(),
            lease_expiry: None,
            failover: None,
            fail_at: None,
            link_delay: Duration::from_millis(wire::default_link_delay_ms()),
        }
    }
    pub fn with_vip_priority_cutoff(mut self, cutoff: i32) -> Self {
        self.vip_priority_cutoff = cutoff;
        self
    }
    pub fn with_delays(mut self, fast: Duration, normal: Duration) -> Self {
        self.fast_delay = fast;
        self.normal_delay = normal;
        self
    }
    pub fn with_lease_time(mut self, lease_time: LeaseTime) -> Self {
        self.lease_time = lease_time;
        self
    }
    pub fn with_lease_expiry(mut self, sweep: Option<Duration>) -> Self {
        self.lease_expiry = sweep;
        self
    }
    pub fn with_failover(mut self, role: Role, partner: NodeId, timing: FailoverTiming) -> Self {
        self.role = role;
        self.partner = Some(partner);
        self.failover = Some(timing);
        self
    }
    pub fn with_fail_at(mut self, at: Option<Duration>) -> Self {
        self.fail_at = at;
        self
    }
}

/// the four pool prefixes, checked not to overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPrefixes {
    pc: Ipv6Net,
    mobile: Ipv6Net,
    printer: Ipv6Net,
    vip: Ipv6Net,
}

impl PoolPrefixes {
    pub fn new(pc: Ipv6Net, mobile: Ipv6Net, printer: Ipv6Net, vip: Ipv6Net) -> Result<Self> {
        let all = [
            (PoolId::Pc, pc.trunc()),
            (PoolId::Mobile, mobile.trunc()),
            (PoolId::Printer, printer.trunc()),
            (PoolId::Vip, vip.trunc()),
        ];
        for (id, net) in &all {
            // a 64 bit counter must fit below the prefix
            if net.prefix_len() > MAX_POOL_PREFIX_LEN {
                bail!("{id} pool {net} is longer than /{MAX_POOL_PREFIX_LEN}");
            }
        }
        for (i, (a_id, a)) in all.iter().enumerate() {
            for (b_id, b) in &all[i + 1..] {
                if a.contains(b) || b.contains(a) {
                    bail!("{a_id} pool {a} overlaps {b_id} pool {b}");
                }
            }
        }
        let [(_, pc), (_, mobile), (_, printer), (_, vip)] = all;
        Ok(Self {
            pc,
            mobile,
            printer,
            vip,
        })
    }

    pub fn get(&self, pool: PoolId) -> Ipv6Net {
        match pool {
            PoolId::Pc => self.pc,
            PoolId::Mobile => self.mobile,
            PoolId::Printer => self.printer,
            PoolId::Vip => self.vip,
        }
    }
}

impl TryFrom<wire::Pools> for PoolPrefixes {
    type Error = anyhow::Error;

    fn try_from(p: wire::Pools) -> Result<Self> {
        Self::new(p.pc, p.mobile, p.printer, p.vip)
    }
}

/// lease durations for the two client classes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LeaseTime {
    vip: Duration,
    normal: Duration,
}

impl LeaseTime {
    pub fn new(vip: Duration, normal: Duration) -> Self {
        Self { vip, normal }
    }
    pub fn get_vip(&self) -> Duration {
        self.vip
    }
    pub fn get_normal(&self) -> Duration {
        self.normal
    }
    /// lease length for an address drawn from `pool`
    pub fn for_pool(&self, pool: PoolId) -> Duration {
        match pool {
            PoolId::Vip => self.vip,
            _ => self.normal,
        }
    }
}

pub fn renew(t: Duration) -> Duration {
    t / 2
}

/// replication and liveness timers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FailoverTiming {
    pub sync_interval: Duration,
    pub heartbeat_interval: Duration,
    pub failover_timeout: Duration,
}

impl TryFrom<wire::Failover> for FailoverTiming {
    type Error = anyhow::Error;

    fn try_from(f: wire::Failover) -> Result<Self> {
        if f.sync_interval_ms == 0 || f.heartbeat_interval_ms == 0 || f.failover_timeout_ms == 0 {
            bail!("failover intervals must be greater than zero");
        }
        if f.heartbeat_interval_ms > f.failover_timeout_ms {
            bail!(
                "heartbeat_interval_ms ({}) is longer than failover_timeout_ms ({}), the backup would promote while the primary is healthy",
                f.heartbeat_interval_ms,
                f.failover_timeout_ms
            );
        }
        Ok(Self {
            sync_interval: Duration::from_millis(f.sync_interval_ms),
            heartbeat_interval: Duration::from_millis(f.heartbeat_interval_ms),
            failover_timeout: Duration::from_millis(f.failover_timeout_ms),
        })
    }
}

/// retry policy for simulated devices
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub after: Duration,
    pub max_retries: u32,
}

/// one simulated client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub id: NodeId,
    pub device_type: DeviceType,
    pub priority: i32,
    /// logical time the device boots
    pub start_at: Duration,
    pub retry: Option<RetryPolicy>,
    pub renew: bool,
}
