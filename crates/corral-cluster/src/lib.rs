//! corral-cluster: local multi-shard clusters.
//!
//! Builds on `corral-server` to run a whole cluster on one host:
//!
//! - **Slot partitioning**: 16384 hash slots split into one contiguous
//!   range per shard
//! - **Formation**: CLUSTER MEET between every pair of primaries, then
//!   CLUSTER ADDSLOTS per shard
//! - **Convergence**: polling CLUSTER INFO until every primary reports ok
//! - **Rollback**: a shard that fails to start takes the others down with it
//! - **Snapshots**: the running topology saved as JSON so a later process
//!   can inspect or stop it
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use corral_cluster::{ClusterTopology, TopologyConfig};
//! use corral_server::{PortAllocator, RespConnector};
//!
//! let config = TopologyConfig { shard_count: 3, ..Default::default() };
//! let mut cluster = ClusterTopology::new(&config, &PortAllocator::default())?;
//! cluster.start(&RespConnector::default(), true, true).await?;
//! // ...
//! cluster.stop(true, true).await;
//! ```

mod error;
mod slots;
mod topology;

pub use error::ClusterError;
pub use slots::{partition, SlotRange, SLOT_COUNT};
pub use topology::{
    ClusterTopology, TopologyConfig, TopologySnapshot, CONVERGENCE_POLL_INTERVAL,
    DEFAULT_CONVERGENCE_TIMEOUT, DEFAULT_START_PORT,
};
