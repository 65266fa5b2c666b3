//! Startup health check.
//!
//! A freshly spawned server is polled until it answers PING, then until
//! any AOF rewrite it kicked off at boot has finished. Each attempt
//! opens a new connection, so a server that is still binding its socket
//! simply shows up as a refused connect and is retried.

use std::time::Duration;

use tracing::debug;

use crate::client::{self, ClientError, Connector};
use crate::endpoint::Endpoint;
use crate::error::ServerError;

/// Pause between attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters for one health check run.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheck<'a> {
    pub server_id: u32,
    pub role: &'static str,
    pub endpoint: &'a Endpoint,
    pub password: Option<&'a str>,
    pub attempts: u32,
    pub interval: Duration,
}

impl HealthCheck<'_> {
    /// Polls until the server is ready.
    ///
    /// `exited` is consulted before every attempt and returns a
    /// description of the exit status once the process has died, which
    /// ends the check early.
    pub async fn run<C, F>(&self, connector: &C, mut exited: F) -> Result<(), ServerError>
    where
        C: Connector,
        F: FnMut() -> Option<String>,
    {
        let mut last_error = String::from("no attempt made");
        let mut attempt = 0;

        // liveness
        loop {
            if attempt >= self.attempts {
                return Err(self.timeout(last_error));
            }
            attempt += 1;
            if let Some(status) = exited() {
                return Err(ServerError::ExitedDuringStartup {
                    server_id: self.server_id,
                    role: self.role,
                    status,
                });
            }

            match self.ping(connector).await {
                Ok(()) => break,
                Err(e) if e.is_loading() => {
                    debug!(server_id = self.server_id, "server is loading its dataset");
                }
                Err(e) if e.is_transport() || e.is_denied() || is_unexpected(&e) => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.interval).await;
        }

        // a server mid-rewrite isn't ready to be used yet
        let mut conn = connector.connect(self.endpoint, self.password).await?;
        loop {
            let info = client::info_section(&mut conn, "persistence").await?;
            let busy = ["aof_rewrite_scheduled", "aof_rewrite_in_progress"]
                .iter()
                .any(|key| info.get(*key).is_some_and(|v| v != "0"));
            if !busy {
                debug!(
                    server_id = self.server_id,
                    role = self.role,
                    attempts = attempt,
                    "server is ready"
                );
                return Ok(());
            }

            if attempt >= self.attempts {
                return Err(self.timeout("aof rewrite still in progress".into()));
            }
            attempt += 1;
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn ping<C: Connector>(&self, connector: &C) -> Result<(), ClientError> {
        let mut conn = connector.connect(self.endpoint, self.password).await?;
        client::ping(&mut conn).await
    }

    fn timeout(&self, last_error: String) -> ServerError {
        ServerError::StartupTimeout {
            server_id: self.server_id,
            role: self.role,
            attempts: self.attempts,
            last_error,
        }
    }
}

fn is_unexpected(e: &ClientError) -> bool {
    matches!(e, ClientError::UnexpectedReply(_))
}
