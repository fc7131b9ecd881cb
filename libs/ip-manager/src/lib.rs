//! # ip-manager
//!
//! Address bookkeeping for one server: [`AddressPool`] hands out addresses
//! from four per-class prefixes by monotonically increasing counters, and
//! [`LeaseTable`] records which device holds which address.
//!
//! Both are owned by a single server and mutated only by its admission
//! scheduler and by the replication merge, so neither type is synchronized.
//!
//! [`AddressPool`]: crate::pool::AddressPool
//! [`LeaseTable`]: crate::lease::LeaseTable
use std::net::Ipv6Addr;

use duet_core::msg::PoolId;
use thiserror::Error;

pub mod lease;
pub mod pool;

pub use lease::{Lease, LeaseTable};
pub use pool::AddressPool;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("address {0} is outside every configured pool")]
    Unpooled(Ipv6Addr),
    #[error("{0} pool has no addresses left")]
    Exhausted(PoolId),
}
