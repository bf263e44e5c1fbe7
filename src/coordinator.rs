//! The mining coordinator: one task that merges pool events, solver
//! events, and the stats timer.
//!
//! The coordinator owns the current work unit and enforces the dispatch
//! precondition: a job line goes to solvers only when the session is
//! authorized and the nonce prefix, target, and header are all present.
//! It is the single writer of all shared state, so no locks are needed.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::job::WorkUnit;
use crate::solver::{lines, DevId, SolverEvent, Supervisor};
use crate::stats::{self, Counters, StatsWindow};
use crate::stratum::{ClientCommand, ClientEvent, SubmitParams};
use crate::tracing::prelude::*;

/// Event-merging core of the miner.
pub struct Coordinator {
    /// Every devid in the configured GPU x instance product
    devids: Vec<DevId>,

    /// The solver fleet; spawned lazily on the first dispatch
    supervisor: Supervisor,

    client_rx: mpsc::Receiver<ClientEvent>,
    solver_rx: mpsc::Receiver<SolverEvent>,
    submit_tx: mpsc::Sender<ClientCommand>,
    shutdown: CancellationToken,

    /// Pool-fixed nonce prefix from the subscribe response
    nonce_left: Option<Vec<u8>>,

    /// Current share target, internal byte order
    target: Option<[u8; 32]>,

    /// Current job: (job_id, assembled header prefix)
    job: Option<(String, Vec<u8>)>,

    /// Whether the current session is authorized
    authorized: bool,

    /// Last reported counters per instance
    counters: HashMap<DevId, Counters>,

    stats: StatsWindow,

    /// Completed dispatches; the first one logs the device count
    dispatches: u64,
}

impl Coordinator {
    /// Create a coordinator wired to the client and solver channels.
    pub fn new(
        devids: Vec<DevId>,
        supervisor: Supervisor,
        client_rx: mpsc::Receiver<ClientEvent>,
        solver_rx: mpsc::Receiver<SolverEvent>,
        submit_tx: mpsc::Sender<ClientCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            devids,
            supervisor,
            client_rx,
            solver_rx,
            submit_tx,
            shutdown,
            nonce_left: None,
            target: None,
            job: None,
            authorized: false,
            counters: HashMap::new(),
            stats: StatsWindow::new(),
            dispatches: 0,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(stats::SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.client_rx.recv() => {
                    self.handle_client_event(event).await;
                }

                Some(event) = self.solver_rx.recv() => {
                    self.handle_solver_event(event).await;
                }

                _ = ticker.tick() => self.sample_stats(),

                _ = self.shutdown.cancelled() => break,
            }
        }

        debug!("Coordinator shutdown complete");
    }

    /// Apply one pool-side event.
    ///
    /// Each intent that can complete the work unit triggers a dispatch
    /// attempt. Targets after the first are stored but only take effect
    /// with the next job.
    async fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Subscribed { nonce_left } => {
                self.nonce_left = Some(nonce_left);
                self.try_dispatch().await;
            }

            ClientEvent::Authorized => {
                self.authorized = true;
                self.try_dispatch().await;
            }

            ClientEvent::TargetSet(target) => {
                let first = self.target.is_none();
                self.target = Some(target);
                if first {
                    self.try_dispatch().await;
                }
            }

            ClientEvent::JobSet { job_id, header } => {
                self.job = Some((job_id, header));
                self.try_dispatch().await;
            }

            ClientEvent::ShareAccepted => {
                // Counted and logged by the client
            }

            ClientEvent::Disconnected => {
                // The replacement session re-derives authorization
                self.authorized = false;
            }
        }
    }

    /// Apply one solver-side event.
    async fn handle_solver_event(&mut self, event: SolverEvent) {
        match event {
            SolverEvent::Solution(solution) => {
                let share = SubmitParams {
                    job_id: solution.job_id,
                    ntime: solution.ntime,
                    nonce_rightpart: solution.nonce_rightpart,
                    sol: solution.sol,
                };
                if self
                    .submit_tx
                    .send(ClientCommand::SubmitShare(share))
                    .await
                    .is_err()
                {
                    warn!("Dropping solution, Stratum client is gone");
                }
            }

            SolverEvent::Status {
                devid,
                sols,
                shares,
            } => {
                self.counters.insert(devid, Counters { sols, shares });
            }

            SolverEvent::Exited { devid } => {
                self.supervisor.remove(devid);
                // Relaunched by the next dispatch attempt
            }
        }
    }

    /// Dispatch the current job if every prerequisite is present.
    async fn try_dispatch(&mut self) {
        if !self.authorized {
            return;
        }
        let (Some(nonce_left), Some(target), Some((job_id, header))) =
            (&self.nonce_left, &self.target, &self.job)
        else {
            return;
        };

        let work = WorkUnit {
            job_id: job_id.clone(),
            header: header.clone(),
            nonce_left: nonce_left.clone(),
            target: *target,
        };
        let line = lines::job_line(&work);

        self.supervisor.ensure_running(&self.devids).await;

        if self.dispatches == 0 {
            info!("Mining on {} device(s)", self.supervisor.live_count());
        }
        self.dispatches += 1;

        debug!(job_id = %work.job_id, "Dispatching job to solvers");
        self.supervisor.broadcast_job(&line).await;
    }

    /// Snapshot counters into the window and emit the stats line.
    ///
    /// Output stays suppressed until the first job has arrived and at
    /// least one solver has reported counters.
    fn sample_stats(&mut self) {
        if self.job.is_none() || self.counters.is_empty() {
            return;
        }

        self.stats.record(Instant::now(), self.counters.clone());

        if let Some(line) = self.stats.report() {
            info!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Solution;

    struct Harness {
        coordinator: Coordinator,
        submit_rx: mpsc::Receiver<ClientCommand>,
    }

    /// Coordinator with an empty device set: dispatch bookkeeping runs,
    /// no processes are ever spawned.
    fn harness() -> Harness {
        let (solver_event_tx, solver_rx) = mpsc::channel(16);
        let (_client_tx, client_rx) = mpsc::channel::<ClientEvent>(16);
        let (submit_tx, submit_rx) = mpsc::channel(16);

        let supervisor = Supervisor::new("sa-solver".into(), solver_event_tx);
        let coordinator = Coordinator::new(
            Vec::new(),
            supervisor,
            client_rx,
            solver_rx,
            submit_tx,
            CancellationToken::new(),
        );

        Harness {
            coordinator,
            submit_rx,
        }
    }

    fn job_event(job_id: &str) -> ClientEvent {
        ClientEvent::JobSet {
            job_id: job_id.to_string(),
            header: vec![0; 108],
        }
    }

    /// No job line until authorized AND nonce, target, and header present.
    #[tokio::test]
    async fn test_dispatch_requires_all_four_prerequisites() {
        let mut h = harness();

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        assert_eq!(h.coordinator.dispatches, 0);

        h.coordinator
            .handle_client_event(ClientEvent::Subscribed {
                nonce_left: vec![0x0a],
            })
            .await;
        assert_eq!(h.coordinator.dispatches, 0);

        h.coordinator
            .handle_client_event(ClientEvent::TargetSet([0xff; 32]))
            .await;
        assert_eq!(h.coordinator.dispatches, 0);

        h.coordinator.handle_client_event(job_event("job1")).await;
        assert_eq!(h.coordinator.dispatches, 1);
    }

    /// Identical back-to-back jobs both dispatch; there is no dedup.
    #[tokio::test]
    async fn test_identical_jobs_both_dispatch() {
        let mut h = harness();

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        h.coordinator
            .handle_client_event(ClientEvent::Subscribed {
                nonce_left: vec![0x0a],
            })
            .await;
        h.coordinator
            .handle_client_event(ClientEvent::TargetSet([0xff; 32]))
            .await;
        h.coordinator.handle_client_event(job_event("job1")).await;
        h.coordinator.handle_client_event(job_event("job1")).await;

        assert_eq!(h.coordinator.dispatches, 2);
    }

    /// Targets after the first apply with the next job, not by themselves.
    #[tokio::test]
    async fn test_later_targets_do_not_redispatch() {
        let mut h = harness();

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        h.coordinator
            .handle_client_event(ClientEvent::Subscribed {
                nonce_left: vec![0x0a],
            })
            .await;
        h.coordinator
            .handle_client_event(ClientEvent::TargetSet([0xff; 32]))
            .await;
        h.coordinator.handle_client_event(job_event("job1")).await;
        assert_eq!(h.coordinator.dispatches, 1);

        h.coordinator
            .handle_client_event(ClientEvent::TargetSet([0xee; 32]))
            .await;
        assert_eq!(h.coordinator.dispatches, 1);

        // The stored target is the new one when the next job lands
        assert_eq!(h.coordinator.target, Some([0xee; 32]));
        h.coordinator.handle_client_event(job_event("job2")).await;
        assert_eq!(h.coordinator.dispatches, 2);
    }

    /// Disconnection clears authorization until the new session restores it.
    #[tokio::test]
    async fn test_disconnect_gates_dispatch() {
        let mut h = harness();

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        h.coordinator
            .handle_client_event(ClientEvent::Subscribed {
                nonce_left: vec![0x0a],
            })
            .await;
        h.coordinator
            .handle_client_event(ClientEvent::TargetSet([0xff; 32]))
            .await;
        h.coordinator.handle_client_event(job_event("job1")).await;
        assert_eq!(h.coordinator.dispatches, 1);

        h.coordinator
            .handle_client_event(ClientEvent::Disconnected)
            .await;
        h.coordinator.handle_client_event(job_event("job2")).await;
        assert_eq!(h.coordinator.dispatches, 1);

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        assert_eq!(h.coordinator.dispatches, 2);
    }

    /// Solutions pass through to the client as submit commands, verbatim.
    #[tokio::test]
    async fn test_solution_forwarded_verbatim() {
        let mut h = harness();

        h.coordinator
            .handle_solver_event(SolverEvent::Solution(Solution {
                job_id: "job1".to_string(),
                ntime: "5a000000".to_string(),
                nonce_rightpart: "deadbeef0011".to_string(),
                sol: "aabbccdd".to_string(),
            }))
            .await;

        match h.submit_rx.try_recv().unwrap() {
            ClientCommand::SubmitShare(share) => {
                assert_eq!(share.job_id, "job1");
                assert_eq!(share.ntime, "5a000000");
                assert_eq!(share.nonce_rightpart, "deadbeef0011");
                assert_eq!(share.sol, "aabbccdd");
            }
        }
    }

    /// Stats output stays suppressed until a job and counters exist.
    #[tokio::test]
    async fn test_stats_suppressed_before_first_job() {
        let mut h = harness();

        h.coordinator
            .handle_solver_event(SolverEvent::Status {
                devid: DevId { gpu: 0, instance: 0 },
                sols: 10,
                shares: 1,
            })
            .await;

        h.coordinator.sample_stats();
        assert!(h.coordinator.stats.is_empty());

        h.coordinator.handle_client_event(ClientEvent::Authorized).await;
        h.coordinator.handle_client_event(job_event("job1")).await;
        h.coordinator.sample_stats();
        assert_eq!(h.coordinator.stats.len(), 1);
    }

    /// A dead solver leaves the live map; counters survive for the stats.
    #[tokio::test]
    async fn test_exited_solver_removed() {
        let mut h = harness();

        h.coordinator
            .handle_solver_event(SolverEvent::Status {
                devid: DevId { gpu: 0, instance: 0 },
                sols: 10,
                shares: 1,
            })
            .await;
        h.coordinator
            .handle_solver_event(SolverEvent::Exited {
                devid: DevId { gpu: 0, instance: 0 },
            })
            .await;

        assert!(!h.coordinator.supervisor.is_live(DevId { gpu: 0, instance: 0 }));
        assert_eq!(h.coordinator.counters.len(), 1);
    }
}
