//! A primary and its optional replica.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::client::Connector;
use crate::command::unix_socket_path;
use crate::config::{PortMode, ServerConfig};
use crate::endpoint::Endpoint;
use crate::error::ServerError;
use crate::instance::{InstanceSnapshot, InstanceSpec, ServerInstance};
use crate::ports::PortAllocator;
use crate::role::Role;
use crate::version::ServerVersion;

/// One partition of the keyspace: a primary plus, optionally, a replica
/// following it. The replica takes the server id after the primary's.
#[derive(Debug)]
pub struct Shard {
    primary: ServerInstance,
    replica: Option<ServerInstance>,
    up: bool,
    healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub primary: InstanceSnapshot,
    pub replica: Option<InstanceSnapshot>,
}

impl Shard {
    /// Validates the config for this shard's shape, assigns endpoints and
    /// builds both instances. Nothing is spawned.
    ///
    /// With [`PortMode::Fixed`] the replica listens on the primary's port
    /// plus one; with [`PortMode::Random`] every instance draws its own
    /// port from `allocator`; with [`PortMode::None`] the shard listens on
    /// a unix socket.
    pub fn new(
        server_id: u32,
        config: &ServerConfig,
        ports: PortMode,
        with_replica: bool,
        cluster_enabled: bool,
        allocator: &PortAllocator,
    ) -> Result<Self, ServerError> {
        let unix = config.unix_socket || ports == PortMode::None;
        config.validate(server_id, unix, with_replica, cluster_enabled)?;

        let token = Uuid::new_v4().simple().to_string();
        let primary_endpoint = match ports {
            PortMode::Fixed(port) if !unix => Endpoint::local(port),
            PortMode::Random if !unix => Endpoint::local(allocator.allocate()?),
            _ => Endpoint::Unix(unix_socket_path(config, &token, Role::Primary.name())),
        };
        let replica_endpoint = match (with_replica, ports) {
            (false, _) => None,
            (true, PortMode::Fixed(port)) => {
                let next = port.checked_add(1).ok_or_else(|| {
                    ServerError::Configuration(format!("no port left after {port} for a replica"))
                })?;
                Some(Endpoint::local(next))
            }
            (true, _) => Some(Endpoint::local(allocator.allocate()?)),
        };

        let version = if config.enable_debug_command {
            let version = ServerVersion::probe(&config.resolved_binary())?;
            debug!(%version, "probed server version");
            Some(version)
        } else {
            None
        };

        let replica = replica_endpoint.map(|endpoint| {
            ServerInstance::new(
                config,
                InstanceSpec {
                    server_id: server_id + 1,
                    role: Role::Replica {
                        primary: primary_endpoint.clone(),
                    },
                    token: &token,
                    endpoint,
                    cluster_enabled,
                    version,
                },
            )
        });
        let primary = ServerInstance::new(
            config,
            InstanceSpec {
                server_id,
                role: Role::Primary,
                token: &token,
                endpoint: primary_endpoint,
                cluster_enabled,
                version,
            },
        );

        Ok(Self {
            primary,
            replica,
            up: false,
            healthy: false,
        })
    }

    pub fn primary(&self) -> &ServerInstance {
        &self.primary
    }

    pub fn replica(&self) -> Option<&ServerInstance> {
        self.replica.as_ref()
    }

    pub fn instances(&self) -> impl Iterator<Item = &ServerInstance> {
        std::iter::once(&self.primary).chain(self.replica.as_ref())
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Starts the selected roles, primary first.
    pub async fn start<C: Connector>(
        &mut self,
        connector: &C,
        primaries: bool,
        replicas: bool,
    ) -> Result<(), ServerError> {
        if self.up && self.healthy {
            return Ok(());
        }
        if primaries {
            self.primary.start(connector).await?;
        }
        if replicas {
            if let Some(replica) = self.replica.as_mut() {
                replica.start(connector).await?;
            }
        }
        self.up = true;
        self.refresh_health();
        Ok(())
    }

    /// Stops the selected roles. Never fails.
    pub async fn stop(&mut self, primaries: bool, replicas: bool) {
        if primaries {
            self.primary.stop().await;
        }
        if replicas {
            if let Some(replica) = self.replica.as_mut() {
                replica.stop().await;
            }
        }
        let up = self.instances().any(ServerInstance::has_process);
        self.up = up;
        self.refresh_health();
    }

    fn refresh_health(&mut self) {
        self.healthy = self.primary.is_healthy()
            && self.replica.as_ref().map_or(true, ServerInstance::is_healthy);
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot {
            primary: self.primary.snapshot(),
            replica: self.replica.as_ref().map(ServerInstance::snapshot),
        }
    }

    pub fn restore(snapshot: ShardSnapshot) -> Self {
        let mut shard = Self {
            primary: ServerInstance::restore(snapshot.primary),
            replica: snapshot.replica.map(ServerInstance::restore),
            up: false,
            healthy: false,
        };
        let up = shard.instances().any(ServerInstance::has_process);
        shard.up = up;
        shard.refresh_health();
        shard
    }
}
