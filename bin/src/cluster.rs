//! Wires a [`ClusterConfig`] into a [`World`].
use anyhow::{Context, Result};
use config::ClusterConfig;
use duet_core::{prelude::*, sim::World};

use crate::{device::Device, node::ServerNode, report::RunReport};

#[derive(Debug)]
pub struct Cluster {
    world: World,
    servers: Vec<(String, NodeId)>,
    devices: Vec<(String, NodeId)>,
    run_for: Duration,
}

impl Cluster {
    /// Servers are attached first so they are up before any device boots.
    pub fn build(cfg: &ClusterConfig) -> Result<Self> {
        let mut world = World::new();
        let mut servers = Vec::with_capacity(cfg.servers().len());
        for server in cfg.servers() {
            let id = world
                .add(ServerNode::new(server.clone()))
                .with_context(|| format!("failed to attach server {}", server.name()))?;
            servers.push((server.name().to_owned(), id));
        }
        let mut devices = Vec::with_capacity(cfg.devices().len());
        for device in cfg.devices() {
            let id = world
                .add(Device::new(device.clone(), cfg.link_delay()))
                .with_context(|| format!("failed to attach device {}", device.name))?;
            devices.push((device.name.clone(), id));
        }
        debug!(servers = servers.len(), devices = devices.len(), "cluster built");
        Ok(Self {
            world,
            servers,
            devices,
            run_for: cfg.run_for(),
        })
    }

    pub fn run_for(&self) -> Duration {
        self.run_for
    }

    /// run flat out to the configured duration
    pub fn run(&mut self) -> usize {
        self.world.run_until(self.run_for)
    }

    pub fn run_until(&mut self, deadline: Duration) -> usize {
        self.world.run_until(deadline)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn server_id(&self, name: &str) -> Option<NodeId> {
        lookup(&self.servers, name)
    }

    pub fn device_id(&self, name: &str) -> Option<NodeId> {
        lookup(&self.devices, name)
    }

    pub fn server(&self, name: &str) -> Option<&ServerNode> {
        self.world.endpoint::<ServerNode>(self.server_id(name)?)
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.world.endpoint::<Device>(self.device_id(name)?)
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerNode> + '_ {
        self.servers
            .iter()
            .filter_map(|(_, id)| self.world.endpoint::<ServerNode>(*id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices
            .iter()
            .filter_map(|(_, id)| self.world.endpoint::<Device>(*id))
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            now_ms: self.world.now().as_millis() as u64,
            nodes: self.servers().map(ServerNode::report).collect(),
            devices: self.devices().map(Device::report).collect(),
        }
    }
}

fn lookup(names: &[(String, NodeId)], name: &str) -> Option<NodeId> {
    names.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
}
