//! Scripted stand-in for server connections.
//!
//! [`ScriptConnector`] answers the handful of commands the launcher and
//! the cluster logic send, without any server behind it. Ports can be
//! made to refuse connections, commands can be made to fail, and
//! `CLUSTER INFO` can be held at `fail` for a while to exercise the
//! convergence wait. Every command is recorded per endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use corral_protocol::Frame;
use tokio::time::Instant;

use crate::client::{ClientError, Connector, ServerConnection};
use crate::endpoint::Endpoint;

#[derive(Debug, Default)]
struct ScriptState {
    refused: HashSet<Endpoint>,
    cluster_ok_at: HashMap<Endpoint, Instant>,
    failures: Vec<(Endpoint, String, String)>,
    commands: HashMap<Endpoint, Vec<Vec<String>>>,
    connects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that refuses every connection to these ports.
    pub fn refusing(ports: impl IntoIterator<Item = u16>) -> Self {
        let connector = Self::new();
        for port in ports {
            connector.refuse(port);
        }
        connector
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        // a panicking test already failed; keep the data for the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn refuse(&self, port: u16) {
        self.state().refused.insert(Endpoint::local(port));
    }

    /// `CLUSTER INFO` on this port reports `fail` until `delay` from now.
    pub fn cluster_ok_after(&self, port: u16, delay: Duration) {
        self.state()
            .cluster_ok_at
            .insert(Endpoint::local(port), Instant::now() + delay);
    }

    /// Makes every command on this port that starts with `prefix`
    /// (e.g. `"CLUSTER ADDSLOTS"`, case-insensitive) answer with an
    /// error reply.
    pub fn fail_command(&self, port: u16, prefix: &str, reply: &str) {
        self.state().failures.push((
            Endpoint::local(port),
            prefix.to_ascii_uppercase(),
            reply.to_string(),
        ));
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Commands sent to this port, in order.
    pub fn commands(&self, port: u16) -> Vec<Vec<String>> {
        self.state()
            .commands
            .get(&Endpoint::local(port))
            .cloned()
            .unwrap_or_default()
    }
}

impl Connector for ScriptConnector {
    type Connection = ScriptConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _password: Option<&str>,
    ) -> Result<ScriptConnection, ClientError> {
        let mut state = self.state();
        state.connects += 1;
        if state.refused.contains(endpoint) {
            return Err(ClientError::Io(
                std::io::ErrorKind::ConnectionRefused.into(),
            ));
        }
        Ok(ScriptConnection {
            endpoint: endpoint.clone(),
            connector: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct ScriptConnection {
    endpoint: Endpoint,
    connector: ScriptConnector,
}

impl ServerConnection for ScriptConnection {
    async fn execute(&mut self, args: &[&str]) -> Result<Frame, ClientError> {
        let mut state = self.connector.state();
        state
            .commands
            .entry(self.endpoint.clone())
            .or_default()
            .push(args.iter().map(|a| a.to_string()).collect());

        let line = args.join(" ").to_ascii_uppercase();
        let failure = state
            .failures
            .iter()
            .find(|(endpoint, prefix, _)| {
                *endpoint == self.endpoint && line.starts_with(prefix.as_str())
            });
        if let Some((_, _, reply)) = failure {
            return Err(ClientError::Reply(reply.clone()));
        }

        let name = args.first().map(|a| a.to_ascii_uppercase()).unwrap_or_default();
        let sub = args.get(1).map(|a| a.to_ascii_uppercase()).unwrap_or_default();
        let reply = match (name.as_str(), sub.as_str()) {
            ("PING", _) => Frame::Simple("PONG".into()),
            ("INFO", _) => bulk(
                "# Persistence\r\naof_rewrite_scheduled:0\r\naof_rewrite_in_progress:0\r\n",
            ),
            ("CLUSTER", "INFO") => {
                let ok = state
                    .cluster_ok_at
                    .get(&self.endpoint)
                    .map_or(true, |at| Instant::now() >= *at);
                let cluster_state = if ok { "ok" } else { "fail" };
                bulk(&format!("cluster_state:{cluster_state}\r\ncluster_known_nodes:1\r\n"))
            }
            _ => Frame::Simple("OK".into()),
        };
        Ok(reply)
    }
}

fn bulk(text: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(text.as_bytes()))
}
