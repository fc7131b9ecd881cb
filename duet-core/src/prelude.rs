//! duet prelude

pub use crate::{
    anyhow::{self, Context, Result},
    handler::{Action, Handler},
    msg::{DeviceType, Envelope, Message, NodeId, PoolCounters, PoolId},
    sim::{Endpoint, Runtime, Timer, TimerId},
    tokio,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::{net::Ipv6Addr, time::Duration};
