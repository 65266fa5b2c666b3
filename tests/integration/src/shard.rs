//! Standalone shards: replication, passwords and persistence.

use std::time::Duration;

use corral_server::client::{info_section, ping};
use corral_server::{
    ClientError, Connector, Persistence, PortAllocator, PortMode, PortRegistry, RespConnector,
    ServerConfig, ServerConnection, ServerError, Shard,
};

use crate::helpers::{require_server, server_config, text};

fn allocator() -> PortAllocator {
    PortAllocator::new(PortRegistry::default())
}

#[tokio::test]
async fn replica_follows_its_primary() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = server_config(&binary, dir.path());
    let connector = RespConnector::default();

    let mut shard = Shard::new(1, &config, PortMode::Random, true, false, &allocator()).unwrap();
    shard.start(&connector, true, true).await.unwrap();
    assert!(shard.is_healthy());

    let mut primary = shard.primary().connect(&connector).await.unwrap();
    primary.execute(&["SET", "greeting", "hello"]).await.unwrap();

    let replica = shard.replica().unwrap();
    let mut conn = replica.connect(&connector).await.unwrap();
    let info = info_section(&mut conn, "replication").await.unwrap();
    assert_eq!(info.get("role").map(String::as_str), Some("slave"));

    // replication is asynchronous
    let mut value = None;
    for _ in 0..50 {
        let reply = conn.execute(&["GET", "greeting"]).await.unwrap();
        if !reply.is_null() {
            value = Some(text(&reply));
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(value.as_deref(), Some("hello"));

    shard.stop(true, true).await;
    assert!(!shard.is_up());
}

#[tokio::test]
async fn password_is_required() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        password: Some("s3cret".into()),
        ..server_config(&binary, dir.path())
    };
    let connector = RespConnector::default();

    let mut shard = Shard::new(1, &config, PortMode::Random, false, false, &allocator()).unwrap();
    shard.start(&connector, true, true).await.unwrap();

    let mut authed = shard.primary().connect(&connector).await.unwrap();
    ping(&mut authed).await.unwrap();

    let mut anonymous = connector.connect(shard.primary().endpoint(), None).await.unwrap();
    let err = anonymous.execute(&["GET", "k"]).await.unwrap_err();
    assert!(matches!(err, ClientError::Reply(ref m) if m.starts_with("NOAUTH")), "{err}");

    shard.stop(true, true).await;
}

#[tokio::test]
async fn append_only_persistence_writes_a_log() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        persistence: Persistence::AppendOnly { rdb_preamble: true },
        ..server_config(&binary, dir.path())
    };
    let connector = RespConnector::default();

    let mut shard = Shard::new(1, &config, PortMode::Random, false, false, &allocator()).unwrap();
    shard.start(&connector, true, true).await.unwrap();

    let mut conn = shard.primary().connect(&connector).await.unwrap();
    let info = info_section(&mut conn, "persistence").await.unwrap();
    assert_eq!(info.get("aof_enabled").map(String::as_str), Some("1"));

    shard.stop(true, true).await;
}

#[tokio::test]
async fn unix_socket_instance_answers() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = server_config(&binary, dir.path());
    let connector = RespConnector::default();

    let mut shard = Shard::new(1, &config, PortMode::None, false, false, &allocator()).unwrap();
    shard.start(&connector, true, true).await.unwrap();
    assert!(shard.primary().endpoint().unix_path().unwrap().exists());

    let mut conn = shard.primary().connect(&connector).await.unwrap();
    ping(&mut conn).await.unwrap();

    shard.stop(true, true).await;
}

#[tokio::test]
async fn a_crashing_server_fails_start() {
    let binary = require_server!();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        // an unknown module makes the server exit right away
        module_paths: vec![dir.path().join("missing.so")],
        ..server_config(&binary, dir.path())
    };
    let connector = RespConnector::default();

    let mut shard = Shard::new(1, &config, PortMode::Random, false, false, &allocator()).unwrap();
    let err = shard.start(&connector, true, true).await.unwrap_err();
    assert!(
        matches!(
            err,
            ServerError::ExitedDuringStartup { .. } | ServerError::StartupTimeout { .. }
        ),
        "{err}"
    );

    shard.stop(true, true).await;
    assert!(shard.primary().pid().is_none());
}
