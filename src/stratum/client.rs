//! Stratum client implementation.
//!
//! This module contains the client that manages the connection lifecycle,
//! the session state machine, and event emission toward the coordinator.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, Transport};
use super::error::{StratumError, StratumResult};
use super::messages::{
    parse_notify, parse_set_target, ClientCommand, ClientEvent, Request, StratumMessage,
};
use crate::job::MAX_NONCE_LEFT_BYTES;

/// Pool connection configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool hostname
    pub host: String,

    /// Pool TCP port
    pub port: u16,

    /// Worker username
    pub user: String,

    /// Worker password, omitted from authorize when absent
    pub pwd: Option<String>,
}

/// Session protocol state.
///
/// A job may be dispatched to solvers only in `Authorized` (the
/// coordinator enforces this together with the work-unit prerequisites).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// TCP connect in flight
    Connecting,
    /// Subscribe sent, awaiting its response
    SentSubscribe,
    /// Authorize sent, awaiting its response
    SentAuthorize,
    /// Handshake complete, shares may be submitted
    Authorized,
}

/// Connection-scoped bookkeeping, reset on every (re)connect.
struct Session {
    state: SessionState,
    next_id: u64,
    expected_id: Option<u64>,
    accepted_shares: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            next_id: 1,
            expected_id: None,
            accepted_shares: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Stratum pool client.
///
/// Owns the TCP connection and the session state machine, pushes typed
/// [`ClientEvent`]s to the coordinator, and consumes [`ClientCommand`]s
/// (share submissions). Reconnects forever on transient failures; only
/// [`StratumError::Fatal`] escapes [`run`](Self::run).
pub struct StratumClient {
    config: PoolConfig,
    event_tx: mpsc::Sender<ClientEvent>,
    command_rx: mpsc::Receiver<ClientCommand>,
    shutdown: CancellationToken,
    session: Session,
}

impl StratumClient {
    /// Create a new client.
    pub fn new(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        command_rx: mpsc::Receiver<ClientCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx,
            shutdown,
            session: Session::new(),
        }
    }

    /// Connect and run until shutdown or a fatal error.
    ///
    /// The first reconnect attempt after a drop is immediate; subsequent
    /// attempts wait one second. The attempt counter only feeds log text.
    pub async fn run(mut self) -> StratumResult<()> {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                info!(attempt, "Reconnecting to pool in 1s");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }

            self.session = Session::new();
            self.session.state = SessionState::Connecting;

            match Connection::connect(&self.config.host, self.config.port).await {
                Ok(conn) => {
                    info!(host = %self.config.host, port = self.config.port, "Connected to pool");
                    attempt = 0;

                    match self.run_connection(conn).await {
                        Ok(()) => return Ok(()),
                        Err(e @ StratumError::Fatal(_)) => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "Pool connection lost");
                            self.event_tx.send(ClientEvent::Disconnected).await.ok();
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to pool");
                }
            }

            self.session.state = SessionState::Disconnected;
            attempt += 1;
        }
    }

    /// Drive one established connection until it drops.
    ///
    /// Returns `Ok(())` only on shutdown; any connection-scoped failure
    /// comes back as an error so the reconnect loop re-enters.
    async fn run_connection(&mut self, mut conn: impl Transport) -> StratumResult<()> {
        // Subscribe immediately; the rest of the handshake is driven by
        // the pool's responses.
        let id = self.session.next_id();
        conn.write_request(&Request::subscribe(id, &self.config.host, self.config.port))
            .await?;
        self.session.expected_id = Some(id);
        self.session.state = SessionState::SentSubscribe;

        loop {
            tokio::select! {
                msg = conn.read_message() => {
                    match msg {
                        Ok(Some(msg)) => self.handle_message(&mut conn, msg).await?,
                        Ok(None) => {
                            info!("Connection closed by pool");
                            return Err(StratumError::Disconnected);
                        }
                        Err(StratumError::Protocol(e)) => {
                            // Pools sometimes send malformed keepalives;
                            // drop the message, keep the connection.
                            warn!(error = %e, "Ignoring malformed message from pool");
                        }
                        Err(e) => return Err(e),
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::SubmitShare(share)) => {
                            let id = self.session.next_id();
                            debug!(job_id = %share.job_id, id, "Submitting share");
                            conn.write_request(&Request::submit(id, &self.config.user, &share))
                                .await?;
                            self.session.expected_id = Some(id);
                        }
                        None => return Ok(()),
                    }
                }

                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Apply one decoded message to the session state machine.
    async fn handle_message(
        &mut self,
        conn: &mut impl Transport,
        msg: StratumMessage,
    ) -> StratumResult<()> {
        match msg {
            StratumMessage::Response { id, result, error } => {
                if !error.is_null() {
                    warn!(?id, %error, "Pool returned error");
                    return Ok(());
                }

                // Deliberate leniency: some pools answer with ids we did
                // not issue. Log and process the response anyway.
                if id != self.session.expected_id {
                    warn!(
                        got = ?id,
                        expected = ?self.session.expected_id,
                        "Response id mismatch"
                    );
                }

                self.handle_response(conn, &result).await
            }

            StratumMessage::Notification { method, params, .. } => match method.as_str() {
                "mining.set_target" => {
                    match parse_set_target(&params) {
                        Ok(target) => {
                            debug!("New target");
                            self.emit(ClientEvent::TargetSet(target)).await?;
                        }
                        Err(e) => warn!(error = %e, "Ignoring bad mining.set_target"),
                    }
                    Ok(())
                }
                "mining.notify" => {
                    match parse_notify(&params) {
                        Ok(job) if job.clean_jobs => {
                            info!(job_id = %job.job_id, "Received new job");
                            self.emit(ClientEvent::JobSet {
                                job_id: job.job_id,
                                header: job.header,
                            })
                            .await?;
                        }
                        Ok(job) => {
                            debug!(job_id = %job.job_id, "Ignoring job without clean_jobs");
                        }
                        Err(e) => warn!(error = %e, "Ignoring bad mining.notify"),
                    }
                    Ok(())
                }
                _ => Err(StratumError::Fatal(format!(
                    "unknown method from pool: {method}"
                ))),
            },
        }
    }

    /// Handle a successful response according to the session state.
    async fn handle_response(
        &mut self,
        conn: &mut impl Transport,
        result: &serde_json::Value,
    ) -> StratumResult<()> {
        match self.session.state {
            SessionState::SentSubscribe => {
                // Result shape: [<ignored>, <nonce_left_hex>]
                let nonce_hex = match result.as_array().and_then(|a| a.get(1)).and_then(|v| v.as_str())
                {
                    Some(hex) => hex,
                    None => {
                        warn!("Malformed subscribe result, dropping");
                        return Ok(());
                    }
                };

                let nonce_left = match hex::decode(nonce_hex) {
                    Ok(bytes) if !bytes.is_empty() => bytes,
                    _ => {
                        warn!(nonce_hex, "Bad nonce prefix in subscribe result, dropping");
                        return Ok(());
                    }
                };

                // The solver needs 3 search bytes and 12 trailing zeros;
                // a longer pool prefix leaves it nothing to do.
                if nonce_left.len() > MAX_NONCE_LEFT_BYTES {
                    return Err(StratumError::Fatal(format!(
                        "pool fixes {} nonce bytes, solver supports at most {}",
                        nonce_left.len(),
                        MAX_NONCE_LEFT_BYTES
                    )));
                }

                debug!(nonce_left = %hex::encode(&nonce_left), "Subscribed");
                self.emit(ClientEvent::Subscribed { nonce_left }).await?;

                let id = self.session.next_id();
                conn.write_request(&Request::authorize(
                    id,
                    &self.config.user,
                    self.config.pwd.as_deref(),
                ))
                .await?;
                self.session.expected_id = Some(id);
                self.session.state = SessionState::SentAuthorize;
                Ok(())
            }

            SessionState::SentAuthorize => {
                if truthy(result) {
                    info!(user = %self.config.user, "Authorized");
                    self.session.state = SessionState::Authorized;
                    self.emit(ClientEvent::Authorized).await?;
                    Ok(())
                } else {
                    Err(StratumError::AuthorizationFailed(
                        "pool rejected credentials".to_string(),
                    ))
                }
            }

            SessionState::Authorized => {
                if truthy(result) {
                    self.session.accepted_shares += 1;
                    info!(total = self.session.accepted_shares, "Share accepted");
                    self.emit(ClientEvent::ShareAccepted).await?;
                } else {
                    warn!("Pool rejected share");
                }
                Ok(())
            }

            SessionState::Disconnected | SessionState::Connecting => Err(StratumError::Fatal(
                format!("response in unexpected state {:?}", self.session.state),
            )),
        }
    }

    async fn emit(&self, event: ClientEvent) -> StratumResult<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| StratumError::Disconnected)
    }
}

/// JSON truthiness, matching what pools mean by `"result": true`.
fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}
