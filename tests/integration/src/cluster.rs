//! A real multi-shard cluster, formed and torn down.

use corral_cluster::{ClusterError, ClusterTopology, SLOT_COUNT};
use corral_server::client::{cluster_info, parse_info};
use corral_server::process::is_pid_alive;
use corral_server::{PortAllocator, PortRegistry, RespConnector, ServerConnection};

use crate::helpers::{require_server, text, topology_config};

#[tokio::test]
async fn three_shards_converge_and_cover_every_slot() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = topology_config(&binary, dir.path(), 3);
    let connector = RespConnector::default();

    let mut topology = ClusterTopology::new(&config, &PortAllocator::new(PortRegistry::default()))
        .unwrap();
    topology.start(&connector, true, true).await.unwrap();
    assert!(topology.is_up());
    assert!(topology.is_healthy());

    for shard in topology.shards() {
        let mut conn = shard.primary().connect(&connector).await.unwrap();
        let info = cluster_info(&mut conn).await.unwrap();
        assert_eq!(info.get("cluster_state").map(String::as_str), Some("ok"));
        assert_eq!(
            info.get("cluster_slots_assigned"),
            Some(&SLOT_COUNT.to_string())
        );
        assert_eq!(info.get("cluster_known_nodes").map(String::as_str), Some("3"));
    }

    let pids: Vec<u32> = topology
        .shards()
        .iter()
        .filter_map(|s| s.primary().pid())
        .collect();
    assert_eq!(pids.len(), 3);

    topology.stop(true, true).await;
    assert!(!topology.is_up());
    for pid in pids {
        assert!(!is_pid_alive(pid), "pid {pid} survived stop");
    }
    for shard in topology.shards() {
        assert!(shard.primary().pid().is_none());
        assert!(shard.primary().exit_code().is_some());
    }
}

#[tokio::test]
async fn keys_land_on_the_shard_owning_their_slot() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = topology_config(&binary, dir.path(), 2);
    let connector = RespConnector::default();

    let mut topology = ClusterTopology::new(&config, &PortAllocator::new(PortRegistry::default()))
        .unwrap();
    topology.start(&connector, true, true).await.unwrap();

    // "a" hashes to slot 15495, which the second shard owns
    let owner = topology.primary(topology.shards()[1].primary().server_id()).unwrap();
    assert!(topology.slots()[1].contains(15495));
    let mut conn = owner.connect(&connector).await.unwrap();
    conn.execute(&["SET", "a", "1"]).await.unwrap();
    assert_eq!(text(&conn.execute(&["GET", "a"]).await.unwrap()), "1");

    let mut other = topology.shards()[0].primary().connect(&connector).await.unwrap();
    let err = other.execute(&["GET", "a"]).await.unwrap_err();
    assert!(err.to_string().contains("MOVED"), "{err}");

    topology.stop(true, true).await;
}

#[tokio::test]
async fn saved_topology_can_be_stopped_by_pid() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = topology_config(&binary, dir.path(), 1);
    let connector = RespConnector::default();
    let state = dir.path().join("run/topology.json");

    let mut topology = ClusterTopology::new(&config, &PortAllocator::new(PortRegistry::default()))
        .unwrap();
    topology.start(&connector, true, true).await.unwrap();
    topology.save(&state).unwrap();
    let pid = topology.shards()[0].primary().pid().unwrap();
    drop(topology);

    let mut restored = ClusterTopology::load(&state).unwrap();
    assert!(restored.is_up());
    let mut conn = restored.shards()[0].primary().connect(&connector).await.unwrap();
    let info = parse_info(&text(&conn.execute(&["INFO", "server"]).await.unwrap()));
    assert_eq!(info.get("process_id"), Some(&pid.to_string()));

    restored.stop(true, true).await;
    assert!(!is_pid_alive(pid));
}

#[tokio::test]
async fn unknown_server_id_is_rejected() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let topology = ClusterTopology::new(
        &topology_config(&binary, dir.path(), 2),
        &PortAllocator::new(PortRegistry::default()),
    )
    .unwrap();
    assert!(topology.primary(2).is_ok());
    assert!(matches!(topology.primary(3), Err(ClusterError::UnknownShard(3))));
}
