//! Locating binaries and building configs for the tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use corral_cluster::TopologyConfig;
use corral_protocol::Frame;
use corral_server::{PortMode, ServerConfig};

/// The server binary to test against, if one is installed.
pub fn server_binary() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("CORRAL_TEST_SERVER") {
        return Some(PathBuf::from(path));
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join("redis-server"))
        .find(|candidate| candidate.is_file())
}

/// Evaluates to the server binary, or returns from the test when none
/// is installed.
macro_rules! require_server {
    () => {
        match $crate::helpers::server_binary() {
            Some(binary) => binary,
            None => {
                eprintln!("skipping: no server binary (set CORRAL_TEST_SERVER)");
                return;
            }
        }
    };
}
pub(crate) use require_server;

/// Server config rooted in a throwaway state dir.
pub fn server_config(binary: &Path, state_dir: &Path) -> ServerConfig {
    ServerConfig {
        binary: binary.to_path_buf(),
        state_dir: state_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn topology_config(binary: &Path, state_dir: &Path, shards: usize) -> TopologyConfig {
    TopologyConfig {
        shard_count: shards,
        server: server_config(binary, state_dir),
        ports: PortMode::Random,
        ..Default::default()
    }
}

/// Text of a bulk or simple reply.
pub fn text(frame: &Frame) -> String {
    frame
        .as_text()
        .unwrap_or_else(|| panic!("expected a text reply, got {frame:?}"))
        .to_string()
}

/// The `corral` binary next to the test executable, if it was built.
pub fn corral_binary() -> Option<PathBuf> {
    let mut dir = std::env::current_exe().ok()?;
    dir.pop();
    if dir.ends_with("deps") {
        dir.pop();
    }
    let path = dir.join("corral");
    path.is_file().then_some(path)
}

/// Runs `corral --state-dir <state_dir> <args>`.
pub fn run_corral(corral: &Path, state_dir: &Path, args: &[&str]) -> Output {
    Command::new(corral)
        .arg("--state-dir")
        .arg(state_dir)
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap_or_else(|e| panic!("failed to run {}: {e}", corral.display()))
}
