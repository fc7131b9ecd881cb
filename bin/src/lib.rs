//! Server nodes, simulated devices and the cluster that runs them.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]

pub mod cluster;
pub mod device;
pub mod node;
pub mod report;

pub use cluster::Cluster;
pub use device::Device;
pub use node::ServerNode;
pub use report::RunReport;
