//! Cluster topology: shards, slots and the formation sequence.
//!
//! A [`ClusterTopology`] is built once from a [`TopologyConfig`] and owns
//! its shards for its whole life. Starting it is all-or-nothing: if any
//! shard fails to come up, every shard is stopped again before the error
//! is returned. Once all shards are healthy the primaries are meshed with
//! CLUSTER MEET, given their slot ranges, and polled until every one of
//! them reports `cluster_state:ok`.

use std::path::Path;
use std::time::Duration;

use corral_server::client::{self, ClientError, ServerConnection};
use corral_server::{
    Connector, Endpoint, PortAllocator, PortMode, ServerConfig, ServerInstance, Shard,
    ShardSnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ClusterError;
use crate::slots::{self, SlotRange};

/// How long the cluster gets to report `cluster_state:ok` everywhere.
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(40);

/// Pause between convergence polls.
pub const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// First port handed out when ports are fixed.
pub const DEFAULT_START_PORT: u16 = 10000;

/// Sent after convergence so search modules rebuild their cluster view.
/// Servers without those modules reject them, which is fine.
const REFRESH_COMMANDS: [&str; 2] = ["FT.CLUSTERREFRESH", "SEARCH.CLUSTERREFRESH"];

/// Parameters for building a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub shard_count: usize,
    /// Applied to every instance in every shard.
    pub server: ServerConfig,
    pub replicas: bool,
    /// With [`PortMode::Fixed`], shard `i` gets the base port plus `2 * i`.
    pub ports: PortMode,
    pub convergence_timeout_secs: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            server: ServerConfig::default(),
            replicas: false,
            ports: PortMode::Fixed(DEFAULT_START_PORT),
            convergence_timeout_secs: DEFAULT_CONVERGENCE_TIMEOUT.as_secs(),
        }
    }
}

impl TopologyConfig {
    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.convergence_timeout_secs)
    }

    /// Number of server processes the topology runs.
    pub fn instance_count(&self) -> usize {
        self.shard_count * if self.replicas { 2 } else { 1 }
    }
}

#[derive(Debug)]
pub struct ClusterTopology {
    shards: Vec<Shard>,
    slots: Vec<SlotRange>,
    convergence_timeout: Duration,
    up: bool,
    healthy: bool,
}

/// Serializable form of a [`ClusterTopology`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub shards: Vec<ShardSnapshot>,
    pub slots: Vec<SlotRange>,
    pub convergence_timeout_secs: u64,
    pub up: bool,
}

impl ClusterTopology {
    /// Builds every shard. Nothing is spawned.
    ///
    /// Server ids ascend from 1; a shard with a replica uses two.
    pub fn new(config: &TopologyConfig, allocator: &PortAllocator) -> Result<Self, ClusterError> {
        if config.shard_count == 0 {
            return Err(ClusterError::Configuration(
                "a cluster needs at least one shard".into(),
            ));
        }

        let ids_per_shard = if config.replicas { 2 } else { 1 };
        let mut shards = Vec::with_capacity(config.shard_count);
        for i in 0..config.shard_count {
            let ports = match config.ports {
                PortMode::Fixed(base) => PortMode::Fixed(shard_port(base, i)?),
                other => other,
            };
            let server_id = u32::try_from(i * ids_per_shard + 1).map_err(|_| {
                ClusterError::Configuration(format!("too many shards: {}", config.shard_count))
            })?;
            shards.push(Shard::new(
                server_id,
                &config.server,
                ports,
                config.replicas,
                true,
                allocator,
            )?);
        }

        Ok(Self {
            slots: slots::partition(shards.len()),
            shards,
            convergence_timeout: config.convergence_timeout(),
            up: false,
            healthy: false,
        })
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Slot range of each shard, in shard order.
    pub fn slots(&self) -> &[SlotRange] {
        &self.slots
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// The primary whose server id is `server_id`.
    pub fn primary(&self, server_id: u32) -> Result<&ServerInstance, ClusterError> {
        self.shards
            .iter()
            .map(Shard::primary)
            .find(|p| p.server_id() == server_id)
            .ok_or(ClusterError::UnknownShard(server_id))
    }

    /// Starts every shard, forms the cluster and waits for it to converge.
    ///
    /// If a shard fails to start, all shards are stopped again and the
    /// error is returned. A convergence timeout leaves the processes
    /// running so they can be inspected.
    pub async fn start<C: Connector>(
        &mut self,
        connector: &C,
        primaries: bool,
        replicas: bool,
    ) -> Result<(), ClusterError> {
        if self.up {
            info!("cluster already up");
            return Ok(());
        }

        let mut failure = None;
        for (i, shard) in self.shards.iter_mut().enumerate() {
            if let Err(e) = shard.start(connector, primaries, replicas).await {
                failure = Some((i + 1, e));
                break;
            }
        }
        if let Some((shard, e)) = failure {
            error!(shard, "shard failed to start, stopping all shards: {e}");
            self.stop(true, true).await;
            return Err(e.into());
        }

        self.form(connector).await?;
        self.wait_for_convergence(connector).await?;
        self.refresh(connector).await;

        self.up = true;
        self.healthy = true;
        info!(shards = self.shards.len(), "cluster is up");
        Ok(())
    }

    /// Meshes the primaries and hands out slot ranges.
    async fn form<C: Connector>(&self, connector: &C) -> Result<(), ClusterError> {
        let peers: Vec<(&str, String)> = self
            .shards
            .iter()
            .filter_map(|s| match s.primary().endpoint() {
                Endpoint::Tcp { host, port } => Some((host.as_str(), port.to_string())),
                Endpoint::Unix(_) => None,
            })
            .collect();

        for (i, (shard, range)) in self.shards.iter().zip(&self.slots).enumerate() {
            let membership = |source| ClusterError::Membership {
                shard: i + 1,
                source,
            };
            let mut conn = shard.primary().connect(connector).await.map_err(membership)?;

            for &(host, ref port) in &peers {
                conn.execute(&["CLUSTER", "MEET", host, port.as_str()])
                    .await
                    .map_err(membership)?;
            }

            if range.is_empty() {
                continue;
            }
            let slot_args: Vec<String> = range.iter().map(|s| s.to_string()).collect();
            let mut args = vec!["CLUSTER", "ADDSLOTS"];
            args.extend(slot_args.iter().map(String::as_str));
            // slots already owned (e.g. a restarted node) are not an error
            if let Err(e) = conn.execute(&args).await {
                warn!(shard = i + 1, slots = %range, "add slots rejected: {e}");
            }
        }
        Ok(())
    }

    /// Polls every primary until all report `cluster_state:ok`.
    ///
    /// Errors while polling count as "not ok yet". Fails with
    /// [`ClusterError::ConvergenceTimeout`] once the timeout has passed.
    pub async fn wait_for_convergence<C: Connector>(&self, connector: &C) -> Result<(), ClusterError> {
        let started = Instant::now();
        loop {
            let mut converged = true;
            for (i, shard) in self.shards.iter().enumerate() {
                match cluster_state(shard, connector).await {
                    Ok(state) if state == "ok" => {}
                    Ok(state) => {
                        debug!(shard = i + 1, %state, "cluster not converged yet");
                        converged = false;
                    }
                    Err(e) => {
                        debug!(shard = i + 1, "cluster info failed, will retry: {e}");
                        converged = false;
                    }
                }
            }

            let elapsed = started.elapsed();
            if converged {
                info!(elapsed_ms = elapsed.as_millis() as u64, "cluster converged");
                return Ok(());
            }
            if elapsed >= self.convergence_timeout {
                return Err(ClusterError::ConvergenceTimeout { elapsed });
            }
            tokio::time::sleep(CONVERGENCE_POLL_INTERVAL).await;
        }
    }

    /// Tells search modules about the new layout. Results are ignored.
    async fn refresh<C: Connector>(&self, connector: &C) {
        for (i, shard) in self.shards.iter().enumerate() {
            let mut conn = match shard.primary().connect(connector).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(shard = i + 1, "refresh skipped: {e}");
                    continue;
                }
            };
            for command in REFRESH_COMMANDS {
                if let Err(e) = conn.execute(&[command]).await {
                    debug!(shard = i + 1, command, "refresh ignored: {e}");
                }
            }
        }
    }

    /// Stops the selected roles on every shard. Never fails.
    ///
    /// The topology stays up while any shard still holds a process, and
    /// is never healthy afterwards.
    pub async fn stop(&mut self, primaries: bool, replicas: bool) {
        self.up = false;
        self.healthy = false;
        for shard in &mut self.shards {
            shard.stop(primaries, replicas).await;
            self.up |= shard.is_up();
        }
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            shards: self.shards.iter().map(Shard::snapshot).collect(),
            slots: self.slots.clone(),
            convergence_timeout_secs: self.convergence_timeout.as_secs(),
            up: self.up,
        }
    }

    /// Rebuilds a topology from a snapshot, adopting recorded pids.
    pub fn restore(snapshot: TopologySnapshot) -> Self {
        let shards: Vec<Shard> = snapshot.shards.into_iter().map(Shard::restore).collect();
        let up = snapshot.up && shards.iter().any(Shard::is_up);
        let healthy = up && shards.iter().all(Shard::is_healthy);
        Self {
            shards,
            slots: snapshot.slots,
            convergence_timeout: Duration::from_secs(snapshot.convergence_timeout_secs),
            up,
            healthy,
        }
    }

    /// Writes the snapshot as JSON, replacing any previous one.
    pub fn save(&self, path: &Path) -> Result<(), ClusterError> {
        let state_err = |source| ClusterError::State {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| state_err(e.into()))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(state_err)?;
        }
        std::fs::write(path, json).map_err(state_err)
    }

    /// Reads a topology saved with [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, ClusterError> {
        let state_err = |source| ClusterError::State {
            path: path.to_path_buf(),
            source,
        };
        let raw = std::fs::read(path).map_err(state_err)?;
        let snapshot: TopologySnapshot =
            serde_json::from_slice(&raw).map_err(|e| state_err(e.into()))?;
        Ok(Self::restore(snapshot))
    }
}

fn shard_port(base: u16, index: usize) -> Result<u16, ClusterError> {
    index
        .checked_mul(2)
        .and_then(|offset| u16::try_from(usize::from(base) + offset).ok())
        .ok_or_else(|| {
            ClusterError::Configuration(format!("shard {} has no port left above {base}", index + 1))
        })
}

async fn cluster_state<C: Connector>(shard: &Shard, connector: &C) -> Result<String, ClientError> {
    let mut conn = shard.primary().connect(connector).await?;
    let info = client::cluster_info(&mut conn).await?;
    Ok(info
        .get("cluster_state")
        .cloned()
        .unwrap_or_else(|| "unknown".into()))
}
