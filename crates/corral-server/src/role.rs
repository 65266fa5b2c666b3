//! Primary and replica roles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// The part an instance plays within its shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica { primary: Endpoint },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica { .. } => "replica",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Role::Primary)
    }

    /// The instance this one follows, if any.
    pub fn peer(&self) -> Option<&Endpoint> {
        match self {
            Role::Primary => None,
            Role::Replica { primary } => Some(primary),
        }
    }

    /// Launch flags only this role needs.
    ///
    /// A replica points at its primary and, when the shard is password
    /// protected, authenticates against it.
    pub fn extra_args(&self, password: Option<&str>) -> Vec<String> {
        let Role::Replica { primary } = self else {
            return Vec::new();
        };
        let mut args = match primary {
            Endpoint::Tcp { host, port } => {
                vec!["--slaveof".to_string(), host.clone(), port.to_string()]
            }
            // validation keeps replicas off unix sockets
            Endpoint::Unix(_) => Vec::new(),
        };
        if let Some(password) = password {
            args.push("--masterauth".into());
            args.push(password.into());
        }
        args
    }

    /// Whether cluster flags apply. Replicas join through their primary.
    pub fn takes_cluster_flags(&self) -> bool {
        self.is_primary()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
