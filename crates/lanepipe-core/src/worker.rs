use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::scheduler::messages::SchedulerMsg;
use crate::stage::StageKind;

/// A unit of work a Worker executes in one message: whatever closure the
/// Scheduler built when it decided to dispatch one sub-step. The closure
/// owns (via an `Arc<..>` clone) just enough of the stage instance to run
/// `execute(sub_step)` and nothing else — the Worker itself never sees
/// stage- or sub-step-specific types (spec §4.1: Workers are stateless).
pub type Job = Box<dyn FnOnce() -> Result<(), SchedulerError> + Send>;

pub struct RunMessage {
    pub stage: StageKind,
    pub slot: usize,
    pub sub_step_name: &'static str,
    pub job: Job,
}

enum WorkerCmd {
    Run(RunMessage),
    Stop,
}

/// Handle the Scheduler holds for a worker thread's inbound queue.
pub struct WorkerHandle {
    pub id: usize,
    tx: mpsc::Sender<WorkerCmd>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send_run(&self, msg: RunMessage) {
        // A closed channel means the worker already exited (WorkerFatal);
        // the Scheduler is expected to have removed it from `busy` already.
        let _ = self.tx.send(WorkerCmd::Run(msg));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(WorkerCmd::Stop);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn one worker thread. Returns a handle the Scheduler uses to post
/// RUN/Stop messages; completions are posted back via `scheduler_tx`.
pub fn spawn_worker(id: usize, scheduler_tx: mpsc::Sender<SchedulerMsg>) -> WorkerHandle {
    let (tx, rx) = mpsc::channel::<WorkerCmd>();

    let join = std::thread::Builder::new()
        .name(format!("lanepipe-worker-{id}"))
        .spawn(move || worker_loop(id, rx, scheduler_tx))
        .expect("failed to spawn worker thread");

    WorkerHandle {
        id,
        tx,
        join: Some(join),
    }
}

fn worker_loop(id: usize, rx: mpsc::Receiver<WorkerCmd>, scheduler_tx: mpsc::Sender<SchedulerMsg>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            WorkerCmd::Run(msg) => {
                debug!(worker = id, stage = %msg.stage, sub_step = msg.sub_step_name, "running sub-step");
                let start = std::time::Instant::now();
                // A panicking job (including a poisoned-lock `.unwrap()` on a
                // peer's instance) is this worker's last act: report it as a
                // `WorkerFatal` sub-step failure and exit the loop for good,
                // matching spec §7's "Worker exits unexpectedly" (the
                // Scheduler removes it from `busy` and never replaces it).
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (msg.job)()));
                let duration = start.elapsed();

                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(worker = id, "job panicked, worker exiting");
                        Err(SchedulerError::WorkerFatal { worker_id: id })
                    }
                };
                let fatal = matches!(result, Err(SchedulerError::WorkerFatal { .. }));

                let complete = SchedulerMsg::CompleteStep {
                    stage: msg.stage,
                    slot: msg.slot,
                    sub_step_name: msg.sub_step_name,
                    worker_id: id,
                    result,
                    duration,
                };
                if scheduler_tx.send(complete).is_err() {
                    warn!(worker = id, "scheduler channel closed, worker exiting");
                    return;
                }
                if fatal {
                    return;
                }
            }
            WorkerCmd::Stop => {
                debug!(worker = id, "worker stopping");
                return;
            }
        }
    }
}
