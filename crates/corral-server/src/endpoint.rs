//! Where an instance listens.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Loopback address every TCP instance is reached on.
pub const LOCALHOST: &str = "127.0.0.1";

/// A TCP port on the local host or a unix socket path; never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn local(port: u16) -> Self {
        Endpoint::Tcp {
            host: LOCALHOST.to_string(),
            port,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Tcp { port, .. } => Some(*port),
            Endpoint::Unix(_) => None,
        }
    }

    pub fn unix_path(&self) -> Option<&Path> {
        match self {
            Endpoint::Tcp { .. } => None,
            Endpoint::Unix(path) => Some(path),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Endpoint::local(10000).to_string(), "127.0.0.1:10000");
        assert_eq!(
            Endpoint::Unix("/tmp/a.sock".into()).to_string(),
            "unix:/tmp/a.sock"
        );
    }

    #[test]
    fn accessors() {
        assert_eq!(Endpoint::local(10002).port(), Some(10002));
        assert_eq!(Endpoint::local(10002).unix_path(), None);
        let unix = Endpoint::Unix("/tmp/b.sock".into());
        assert_eq!(unix.port(), None);
        assert_eq!(unix.unix_path(), Some(Path::new("/tmp/b.sock")));
    }
}
