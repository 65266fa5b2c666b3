//! Server version probing.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::ServerError;

/// First release that understands `--enable-debug-command`.
pub const DEBUG_COMMAND_MIN_VERSION: ServerVersion = ServerVersion(70000);

/// A version encoded as `major * 10000 + minor * 100 + patch`, so plain
/// integer comparison orders releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion(pub u32);

impl ServerVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(major * 10000 + minor * 100 + patch)
    }

    /// Like [`new`](Self::new), but `None` when the encoding overflows.
    pub fn checked_new(major: u32, minor: u32, patch: u32) -> Option<Self> {
        major
            .checked_mul(10000)?
            .checked_add(minor.checked_mul(100)?)?
            .checked_add(patch)
            .map(Self)
    }

    /// Runs `<binary> --version` and parses the result.
    pub fn probe(binary: &Path) -> Result<Self, ServerError> {
        let probe_err = |reason: String| ServerError::VersionProbe {
            binary: binary.to_path_buf(),
            reason,
        };

        let output = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| probe_err(e.to_string()))?;
        if !output.status.success() {
            return Err(probe_err(format!("--version exited with {}", output.status)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Self::parse(&text).ok_or_else(|| probe_err(format!("no v=<version> in {:?}", text.trim())))
    }

    /// Extracts the `v=<major>.<minor>.<patch>` token from version output
    /// such as `Redis server v=7.2.4 sha=00000000:0 malloc=jemalloc-5.3.0`.
    pub fn parse(output: &str) -> Option<Self> {
        let token = output
            .split_whitespace()
            .find_map(|word| word.strip_prefix("v="))?;
        let mut parts = token.split('.').map(|p| p.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next()??;
        let patch = parts.next()??;
        Self::checked_new(major, minor, patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(f, "{}.{}.{}", v / 10000, v / 100 % 100, v % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_banner() {
        let v = ServerVersion::parse(
            "Redis server v=7.2.4 sha=00000000:0 malloc=jemalloc-5.3.0 bits=64 build=abc",
        )
        .unwrap();
        assert_eq!(v, ServerVersion(70204));
        assert_eq!(v.to_string(), "7.2.4");
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(ServerVersion::new(6, 2, 14) < DEBUG_COMMAND_MIN_VERSION);
        assert!(ServerVersion::new(7, 0, 0) >= DEBUG_COMMAND_MIN_VERSION);
        assert!(ServerVersion::new(10, 0, 0) > ServerVersion::new(7, 99, 99));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(ServerVersion::parse("redis-server 7.2.4"), None);
        assert_eq!(ServerVersion::parse("v=7.x.4"), None);
        assert_eq!(ServerVersion::parse("v=7.2"), None);
    }

    #[test]
    fn oversized_components_do_not_parse() {
        assert_eq!(ServerVersion::parse("Redis server v=429497.0.0 sha=0"), None);
        assert_eq!(ServerVersion::parse("v=1.4294967295.0"), None);
        assert_eq!(ServerVersion::parse("v=0.0.4294967295"), Some(ServerVersion(u32::MAX)));
    }

    #[cfg(unix)]
    #[test]
    fn probe_runs_the_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        std::fs::write(&good, "#!/bin/sh\necho 'Redis server v=7.4.1 sha=0'\n").unwrap();
        std::fs::set_permissions(&good, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(ServerVersion::probe(&good).unwrap(), ServerVersion(70401));

        let bad = dir.path().join("bad");
        std::fs::write(&bad, "#!/bin/sh\necho 'v=7.4.1'\nexit 1\n").unwrap();
        std::fs::set_permissions(&bad, std::fs::Permissions::from_mode(0o755)).unwrap();
        let err = ServerVersion::probe(&bad).unwrap_err();
        assert!(matches!(err, ServerError::VersionProbe { .. }), "{err}");

        let huge = dir.path().join("huge");
        std::fs::write(&huge, "#!/bin/sh\necho 'Redis server v=429497.0.0 sha=0'\n").unwrap();
        std::fs::set_permissions(&huge, std::fs::Permissions::from_mode(0o755)).unwrap();
        let err = ServerVersion::probe(&huge).unwrap_err();
        assert!(matches!(err, ServerError::VersionProbe { .. }), "{err}");
    }
}
