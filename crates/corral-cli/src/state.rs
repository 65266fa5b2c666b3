//! Workspace layout and the persisted running topology.

use std::path::{Path, PathBuf};

use corral_cluster::ClusterTopology;

use crate::error::CliError;

/// Subdirectories `corral init` creates under the state dir.
pub const WORKSPACE_DIRS: [&str; 6] = ["bin", "cfg", "mod", "log", "rdb", "run"];

const TOPOLOGY_FILE: &str = "run/topology.json";

pub fn topology_path(state_dir: &Path) -> PathBuf {
    state_dir.join(TOPOLOGY_FILE)
}

/// Creates the workspace directories. Existing ones are left alone.
pub fn init_workspace(state_dir: &Path) -> Result<Vec<PathBuf>, CliError> {
    WORKSPACE_DIRS
        .iter()
        .map(|name| {
            let dir = state_dir.join(name);
            std::fs::create_dir_all(&dir).map_err(CliError::io(&dir))?;
            Ok(dir)
        })
        .collect()
}

/// Loads the topology saved by `corral start`.
pub fn load_topology(state_dir: &Path) -> Result<ClusterTopology, CliError> {
    let path = topology_path(state_dir);
    if !path.is_file() {
        return Err(CliError::NotRunning(state_dir.to_path_buf()));
    }
    Ok(ClusterTopology::load(&path)?)
}

pub fn save_topology(state_dir: &Path, topology: &ClusterTopology) -> Result<(), CliError> {
    Ok(topology.save(&topology_path(state_dir))?)
}

/// Forgets the saved topology. A missing file is fine.
pub fn clear_topology(state_dir: &Path) -> Result<(), CliError> {
    let path = topology_path(state_dir);
    match std::fs::remove_file(&path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(CliError::io(path)(e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use corral_cluster::TopologyConfig;
    use corral_server::{PortAllocator, PortRegistry};

    use super::*;

    #[test]
    fn init_creates_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let created = init_workspace(&state).unwrap();
        assert_eq!(created.len(), WORKSPACE_DIRS.len());
        assert!(created.iter().all(|d| d.is_dir()));

        // running it again is harmless
        init_workspace(&state).unwrap();
    }

    #[test]
    fn missing_state_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_topology(dir.path()).unwrap_err();
        assert!(matches!(err, CliError::NotRunning(_)), "{err}");
        clear_topology(dir.path()).unwrap();
    }

    #[test]
    fn saved_topology_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = TopologyConfig {
            shard_count: 2,
            ..Default::default()
        };
        cfg.server.state_dir = dir.path().to_path_buf();
        let allocator = PortAllocator::new(PortRegistry::new(dir.path().join("ports.json")));
        let topology = ClusterTopology::new(&cfg, &allocator).unwrap();

        save_topology(dir.path(), &topology).unwrap();
        let loaded = load_topology(dir.path()).unwrap();
        assert_eq!(loaded.snapshot(), topology.snapshot());

        clear_topology(dir.path()).unwrap();
        assert!(!topology_path(dir.path()).exists());
    }
}
