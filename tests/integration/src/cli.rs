//! The `corral` binary driving a real cluster.

use crate::helpers::{corral_binary, require_server, run_corral};

#[test]
fn start_status_cli_stop() {
    let binary = require_server!();
    let Some(corral) = corral_binary() else {
        eprintln!("skipping: corral binary not built");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path();
    let server = binary.to_string_lossy().into_owned();

    let started = run_corral(
        &corral,
        state,
        &["start", "--binary", &server, "--shards", "2", "--random-ports"],
    );
    assert!(
        started.status.success(),
        "start failed: {}",
        String::from_utf8_lossy(&started.stderr)
    );
    assert!(state.join("run/topology.json").is_file());
    let listing = String::from_utf8_lossy(&started.stdout);
    assert!(listing.contains("shard 2"), "{listing}");

    let status = run_corral(&corral, state, &["status"]);
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stdout));

    let reply = run_corral(&corral, state, &["cli", "1", "CLUSTER", "INFO"]);
    assert!(reply.status.success());
    assert!(String::from_utf8_lossy(&reply.stdout).contains("cluster_state:ok"));

    let error = run_corral(&corral, state, &["cli", "1", "NOTAREALCOMMAND"]);
    assert!(!error.status.success());
    assert!(String::from_utf8_lossy(&error.stdout).contains("(error)"));

    let again = run_corral(&corral, state, &["start", "--binary", &server]);
    assert!(!again.status.success(), "second start should be refused");

    let stopped = run_corral(&corral, state, &["stop"]);
    assert!(stopped.status.success());
    assert!(!state.join("run/topology.json").exists());

    let info = run_corral(&corral, state, &["info"]);
    assert!(!info.status.success());
}

#[test]
fn init_and_config_template() {
    let Some(corral) = corral_binary() else {
        eprintln!("skipping: corral binary not built");
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let init = run_corral(&corral, dir.path(), &["init"]);
    assert!(init.status.success());
    for sub in ["bin", "cfg", "mod", "log", "rdb", "run"] {
        assert!(dir.path().join(sub).is_dir(), "{sub} missing");
    }

    let template = run_corral(&corral, dir.path(), &["config-template"]);
    assert!(template.status.success());
    assert!(String::from_utf8_lossy(&template.stdout).contains("shard_count = 1"));
}
