//! Solver subprocess supervision.
//!
//! One `sa-solver` child runs per device instance. The supervisor owns
//! each child's stdin write half and the liveness map; a reader task per
//! child owns the process itself and its stdout, forwarding parsed lines
//! to the coordinator as [`SolverEvent`]s. Crashed instances are removed
//! from the live map and relaunched by the next job dispatch.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use super::lines::{self, Solution, SolverLine, BANNER};
use crate::tracing::prelude::*;

/// One solver process identity: `<gpu>.<instance>`.
///
/// The instance id is local bookkeeping; the solver is only told the GPU
/// (multiple instances on one GPU are simply multiple processes with the
/// same `--use`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevId {
    /// OpenCL GPU id
    pub gpu: u32,
    /// Instance index on that GPU
    pub instance: u32,
}

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.gpu, self.instance)
    }
}

/// Events flowing from solver reader tasks to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverEvent {
    /// A solution line; forwarded to the pool verbatim
    Solution(Solution),

    /// Cumulative counters reported by one instance
    Status {
        /// Reporting instance
        devid: DevId,
        /// Solutions found since process start
        sols: u64,
        /// Shares found since process start
        shares: u64,
    },

    /// Instance stdout reached EOF and the process was reaped
    Exited {
        /// The instance that died
        devid: DevId,
    },
}

/// Path of the solver binary: a sibling of the running executable.
pub fn solver_path() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "executable has no parent directory")
    })?;
    Ok(dir.join("sa-solver"))
}

/// Supervisor for the solver fleet.
pub struct Supervisor {
    solver_path: PathBuf,
    event_tx: mpsc::Sender<SolverEvent>,
    live: HashMap<DevId, ChildStdin>,
}

impl Supervisor {
    /// Create a supervisor; no processes are spawned until the first
    /// dispatch calls [`ensure_running`](Self::ensure_running).
    pub fn new(solver_path: PathBuf, event_tx: mpsc::Sender<SolverEvent>) -> Self {
        Self {
            solver_path,
            event_tx,
            live: HashMap::new(),
        }
    }

    /// Number of currently live instances.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether this instance currently has a live process.
    pub fn is_live(&self, devid: DevId) -> bool {
        self.live.contains_key(&devid)
    }

    /// Drop a dead instance from the live map.
    pub fn remove(&mut self, devid: DevId) {
        self.live.remove(&devid);
    }

    /// Launch every configured instance that is not currently live.
    pub async fn ensure_running(&mut self, devids: &[DevId]) {
        for &devid in devids {
            if !self.live.contains_key(&devid) {
                self.spawn_instance(devid).await;
            }
        }
    }

    /// Write one job line to every live instance.
    ///
    /// Writes are best-effort: a closed pipe logs, and the instance is
    /// dropped from the live map so the next dispatch relaunches it.
    pub async fn broadcast_job(&mut self, line: &str) {
        let mut dead = Vec::new();

        for (devid, stdin) in &mut self.live {
            let write = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                warn!(devid = %devid, error = %e, "Failed to write job to solver");
                dead.push(*devid);
            }
        }

        for devid in dead {
            self.live.remove(&devid);
        }
    }

    /// Spawn one solver instance and check its banner.
    ///
    /// On success the instance joins the live map and a reader task takes
    /// over its stdout. A banner mismatch or early EOF kills the child
    /// and leaves the instance absent; the next dispatch retries. A
    /// missing solver binary is unrecoverable and exits the process
    /// directly rather than raising through the async machinery.
    async fn spawn_instance(&mut self, devid: DevId) {
        debug!(devid = %devid, solver = %self.solver_path.display(), "Launching solver");

        let spawned = Command::new(&self.solver_path)
            .arg("--mining")
            .arg("--use")
            .arg(devid.gpu.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!(
                    solver = %self.solver_path.display(),
                    "Solver binary not found; install sa-solver next to sa-miner"
                );
                std::process::exit(1);
            }
            Err(e) => {
                warn!(devid = %devid, error = %e, "Failed to launch solver");
                return;
            }
        };

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                warn!(devid = %devid, "Solver has no stdin pipe");
                let _ = child.kill().await;
                return;
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                warn!(devid = %devid, "Solver has no stdout pipe");
                let _ = child.kill().await;
                return;
            }
        };

        let mut stdout_lines = BufReader::new(stdout).lines();

        // Startup handshake: the first line must be the mining banner.
        match stdout_lines.next_line().await {
            Ok(Some(line)) if line == BANNER => {}
            Ok(Some(line)) => {
                warn!(devid = %devid, line = %line, "Unexpected solver banner, killing");
                let _ = child.kill().await;
                return;
            }
            Ok(None) => {
                warn!(devid = %devid, "Solver exited before banner");
                let _ = child.kill().await;
                return;
            }
            Err(e) => {
                warn!(devid = %devid, error = %e, "Failed to read solver banner, killing");
                let _ = child.kill().await;
                return;
            }
        }

        // Solver diagnostics arrive on stderr; drain them to the log so
        // the stdout line protocol stays clean.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(devid = %devid, "solver: {}", line);
                }
            });
        }

        tokio::spawn(reader_task(
            devid,
            child,
            stdout_lines,
            self.event_tx.clone(),
        ));

        self.live.insert(devid, stdin);
        info!(devid = %devid, "Solver instance ready");
    }
}

/// Read one solver's stdout until EOF, then reap the process.
///
/// Solution lines from one instance reach the channel in emission order.
async fn reader_task(
    devid: DevId,
    mut child: Child,
    mut stdout_lines: Lines<BufReader<ChildStdout>>,
    event_tx: mpsc::Sender<SolverEvent>,
) {
    loop {
        let line = match stdout_lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(devid = %devid, error = %e, "Error reading solver stdout");
                break;
            }
        };

        let event = match lines::parse(&line) {
            SolverLine::Sol(solution) => {
                debug!(devid = %devid, job_id = %solution.job_id, "Solution found");
                SolverEvent::Solution(solution)
            }
            SolverLine::Status { nr_sols, nr_shares } => SolverEvent::Status {
                devid,
                sols: nr_sols,
                shares: nr_shares,
            },
            SolverLine::Msg(msg) => {
                trace!(devid = %devid, "solver: {}", msg);
                continue;
            }
        };

        if event_tx.send(event).await.is_err() {
            // Coordinator is gone; nothing left to do but reap.
            break;
        }
    }

    match child.wait().await {
        Ok(status) => warn!(devid = %devid, %status, "Solver exited"),
        Err(e) => warn!(devid = %devid, error = %e, "Failed to reap solver"),
    }

    event_tx.send(SolverEvent::Exited { devid }).await.ok();
}
