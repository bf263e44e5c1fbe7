//! Miner lifecycle management.
//!
//! This module wires the Stratum client, the coordinator, and the solver
//! supervisor together with channels, then runs until a signal arrives.
//! Interrupt handling is deliberately abrupt: solvers are not shut down
//! cleanly, the OS reaps them through pipe closure.

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::solver::{solver_path, SolverEvent, Supervisor};
use crate::stratum::{ClientCommand, ClientEvent, PoolConfig, StratumClient};
use crate::tracing::prelude::*;

/// The main miner process.
pub struct Daemon {
    config: Config,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the miner until interrupted.
    pub async fn run(self) -> anyhow::Result<()> {
        // Channels between the three long-lived tasks
        let (client_event_tx, client_event_rx) = mpsc::channel::<ClientEvent>(100);
        let (command_tx, command_rx) = mpsc::channel::<ClientCommand>(100);
        let (solver_event_tx, solver_event_rx) = mpsc::channel::<SolverEvent>(100);

        let supervisor = Supervisor::new(solver_path()?, solver_event_tx);

        let pool = PoolConfig {
            host: self.config.host.clone(),
            port: self.config.port,
            user: self.config.user.clone(),
            pwd: self.config.pwd.clone(),
        };

        let client = StratumClient::new(pool, client_event_tx, command_rx, self.shutdown.clone());
        self.tracker.spawn(async move {
            // Only fatal protocol conditions escape the reconnect loop,
            // and they must take the whole process down.
            if let Err(e) = client.run().await {
                error!("{}", e);
                std::process::exit(1);
            }
        });

        let coordinator = Coordinator::new(
            self.config.devids(),
            supervisor,
            client_event_rx,
            solver_event_rx,
            command_tx,
            self.shutdown.clone(),
        );
        self.tracker.spawn(coordinator.run());
        self.tracker.close();

        info!(
            pool = %format_args!("{}:{}", self.config.host, self.config.port),
            user = %self.config.user,
            "Started."
        );

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        // Wait for shutdown signal
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            },
        }

        // Exit promptly; solver pipes close with the process.
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}
