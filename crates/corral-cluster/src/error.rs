//! Error types for cluster operations.

use std::time::Duration;

use corral_server::{ClientError, ServerError};

/// Errors that can occur while forming or running a cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A shard could not be built or started.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Invalid topology parameters.
    #[error("invalid cluster configuration: {0}")]
    Configuration(String),

    /// A primary could not be joined into the cluster mesh.
    #[error("shard {shard} failed to join the cluster: {source}")]
    Membership {
        shard: usize,
        #[source]
        source: ClientError,
    },

    /// The cluster never reported `cluster_state:ok` on every shard.
    #[error("cluster did not converge within {:.1}s", elapsed.as_secs_f64())]
    ConvergenceTimeout { elapsed: Duration },

    /// No shard's primary has this server id.
    #[error("no shard with server id {0}")]
    UnknownShard(u32),

    /// Topology state could not be read or written.
    #[error("topology state {}: {source}", path.display())]
    State {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
