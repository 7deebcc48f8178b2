//! Worker Supervisor
//!
//! Keeps a fixed pool of worker processes alive. Every exit, whatever its
//! cause, is answered by one replacement in the same slot, paced by the
//! [`RestartPolicy`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::policy::{RestartDecision, RestartPolicy, RestartTracker};
use crate::cluster::worker::WORKER_ENV;

/// How long a worker may take to drain after SIGTERM before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// == Errors ==
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The worker executable could not be launched
    #[error("failed to spawn worker in slot {slot}: {source}")]
    Spawn {
        slot: usize,
        #[source]
        source: io::Error,
    },

    /// Workers died faster than the restart ceiling allows
    #[error("restart limit reached: {restarts} restarts within {window:?}")]
    RestartLimit { restarts: u32, window: Duration },

    /// The supervision task itself panicked or was aborted
    #[error("supervisor task failed: {0}")]
    Task(String),
}

// == Worker Command ==
/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-executes the running binary with its original arguments.
    pub fn current_exe() -> io::Result<Self> {
        let mut command = Self::new(std::env::current_exe()?);
        command.args = std::env::args_os().skip(1).collect();
        Ok(command)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn spawn(&self, slot: usize) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, slot.to_string())
            .kill_on_drop(true)
            .spawn()
    }
}

// == Worker Record ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Exited,
}

/// Bookkeeping for one slot of the pool.
///
/// There is one record per slot. It describes the process currently bound to
/// that slot: a replacement takes over the record of the worker it replaces
/// and bumps `generation`. Records leave the pool only at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub slot: usize,
    /// `None` when the OS no longer reports an id for the child
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    /// How many processes this slot has gone through before this one
    pub generation: u32,
}

/// Reported by a watcher when its process ends on its own.
#[derive(Debug)]
struct WorkerExit {
    slot: usize,
    pid: Option<u32>,
    status: io::Result<ExitStatus>,
}

type Records = Arc<RwLock<BTreeMap<usize, WorkerRecord>>>;

// == Supervisor ==
pub struct WorkerSupervisor {
    command: WorkerCommand,
    size: usize,
    policy: RestartPolicy,
}

impl WorkerSupervisor {
    pub fn new(command: WorkerCommand, size: usize, policy: RestartPolicy) -> Self {
        Self {
            command,
            size: size.max(1),
            policy,
        }
    }

    /// Spawns the initial pool and hands supervision to a background task.
    ///
    /// Fails if any initial worker cannot be launched; workers already
    /// started are killed on drop.
    pub async fn start(self) -> Result<SupervisorHandle, SupervisorError> {
        let records: Records = Arc::new(RwLock::new(BTreeMap::new()));
        let restarts = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let mut pool = Pool {
            command: self.command,
            records: Arc::clone(&records),
            restarts: Arc::clone(&restarts),
            shutdown: shutdown.clone(),
            exit_tx,
            watchers: JoinSet::new(),
        };

        info!(
            pid = std::process::id(),
            workers = self.size,
            "Supervisor forking {} workers...",
            self.size
        );
        for slot in 0..self.size {
            pool.spawn(slot, 0).await?;
        }

        let task = tokio::spawn(pool.supervise(exit_rx, RestartTracker::new(self.policy)));

        Ok(SupervisorHandle {
            records,
            restarts,
            shutdown,
            task,
        })
    }
}

// == Handle ==
/// Observes and stops a running supervisor.
pub struct SupervisorHandle {
    records: Records,
    restarts: Arc<AtomicU64>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), SupervisorError>>,
}

impl SupervisorHandle {
    /// Snapshot of every slot, ordered by slot.
    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of slots whose process is running.
    pub async fn active_workers(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.status == WorkerStatus::Running)
            .count()
    }

    /// Replacements spawned since start.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    /// Token that stops the supervisor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Asks every worker to stop and stops replacing them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits until the supervisor has stopped and all workers are gone.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        self.task
            .await
            .map_err(|err| SupervisorError::Task(err.to_string()))?
    }
}

// == Pool ==
struct Pool {
    command: WorkerCommand,
    records: Records,
    restarts: Arc<AtomicU64>,
    shutdown: CancellationToken,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
    watchers: JoinSet<()>,
}

impl Pool {
    async fn spawn(&mut self, slot: usize, generation: u32) -> Result<(), SupervisorError> {
        let child = self
            .command
            .spawn(slot)
            .map_err(|source| SupervisorError::Spawn { slot, source })?;
        let pid = child.id();

        self.records.write().await.insert(
            slot,
            WorkerRecord {
                slot,
                pid,
                status: WorkerStatus::Running,
                started_at: Utc::now(),
                generation,
            },
        );
        info!(slot, worker_pid = ?pid, generation, "Worker started");

        self.watchers.spawn(watch(
            child,
            slot,
            pid,
            self.exit_tx.clone(),
            self.shutdown.clone(),
        ));
        Ok(())
    }

    async fn supervise(
        mut self,
        mut exits: mpsc::UnboundedReceiver<WorkerExit>,
        mut tracker: RestartTracker,
    ) -> Result<(), SupervisorError> {
        let outcome = loop {
            let exit = tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                exit = exits.recv() => match exit {
                    Some(exit) => exit,
                    None => break Ok(()),
                },
            };

            self.reap();
            let generation = self.mark_exited(&exit).await;
            let label = pid_label(exit.pid);
            match exit.status {
                Ok(status) => warn!(
                    slot = exit.slot,
                    worker_pid = ?exit.pid,
                    %status,
                    "Worker {} died. Forking a new worker...",
                    label
                ),
                Err(ref err) => warn!(
                    slot = exit.slot,
                    worker_pid = ?exit.pid,
                    error = %err,
                    "Lost track of worker {}. Forking a new worker...",
                    label
                ),
            }

            if let Err(err) = self.replace(exit.slot, generation + 1, &mut tracker).await {
                break Err(err);
            }
        };

        self.stop().await;
        if let Err(ref err) = outcome {
            error!(error = %err, "Supervisor giving up");
        }
        outcome
    }

    /// Spawns the replacement for `slot`, retrying failed launches under the
    /// same policy as worker exits.
    async fn replace(
        &mut self,
        slot: usize,
        generation: u32,
        tracker: &mut RestartTracker,
    ) -> Result<(), SupervisorError> {
        loop {
            let delay = match tracker.record(Instant::now()) {
                RestartDecision::Restart(delay) => delay,
                RestartDecision::GiveUp => {
                    return Err(SupervisorError::RestartLimit {
                        restarts: tracker.recent() as u32,
                        window: tracker.window(),
                    })
                }
            };

            if !delay.is_zero() {
                info!(slot, ?delay, "Backing off before restarting worker");
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            match self.spawn(slot, generation).await {
                Ok(()) => {
                    self.restarts.fetch_add(1, Ordering::AcqRel);
                    return Ok(());
                }
                Err(err) => error!(slot, error = %err, "Replacement worker failed to start"),
            }
        }
    }

    async fn mark_exited(&self, exit: &WorkerExit) -> u32 {
        let mut records = self.records.write().await;
        match records.get_mut(&exit.slot) {
            Some(record) if record.pid == exit.pid => {
                record.status = WorkerStatus::Exited;
                record.generation
            }
            Some(record) => record.generation,
            None => 0,
        }
    }

    /// Drops watcher tasks that have already finished.
    fn reap(&mut self) {
        while self.watchers.try_join_next().is_some() {}
    }

    /// Terminates every worker and clears the records.
    async fn stop(&mut self) {
        self.shutdown.cancel();
        while self.watchers.join_next().await.is_some() {}
        self.records.write().await.clear();
        info!("All workers stopped");
    }
}

/// Waits on one child. Reports a natural exit; on shutdown, terminates the
/// child instead and reports nothing.
async fn watch(
    mut child: Child,
    slot: usize,
    pid: Option<u32>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        status = child.wait() => {
            let _ = exits.send(WorkerExit { slot, pid, status });
        }
        _ = shutdown.cancelled() => terminate(&mut child, pid).await,
    }
}

/// SIGTERM, then a hard kill once the grace period runs out. Without a pid
/// there is nothing safe to signal, so the child is killed directly.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if !request_stop(pid) {
        if let Err(err) = child.start_kill() {
            warn!(worker_pid = ?pid, error = %err, "Failed to stop worker");
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(_) => info!(worker_pid = ?pid, "Worker stopped"),
        Err(_) => {
            warn!(worker_pid = ?pid, "Worker ignored SIGTERM, killing");
            if let Err(err) = child.kill().await {
                error!(worker_pid = ?pid, error = %err, "Failed to kill worker");
            }
        }
    }
}

/// Sends SIGTERM to `pid`. Returns whether the signal was delivered.
#[cfg(unix)]
fn request_stop(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Pid 0 or a negative value would address a whole process group.
    let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()).filter(|raw| *raw > 0) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            warn!(worker_pid = raw, error = %err, "Failed to signal worker");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_stop(_pid: Option<u32>) -> bool {
    false
}

fn pid_label(pid: Option<u32>) -> String {
    pid.map_or_else(|| "<unknown>".to_string(), |pid| pid.to_string())
}
