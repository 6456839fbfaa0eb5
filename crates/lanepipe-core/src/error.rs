use thiserror::Error;

use crate::stage::StageKind;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("frame source failed: {0}")]
    SourceFailure(String),

    #[error("stage {stage:?} sub-step {sub_step} failed: {message}")]
    StageFailure {
        stage: StageKind,
        sub_step: &'static str,
        recoverable: bool,
        message: String,
    },

    #[error("worker {worker_id} exited fatally")]
    WorkerFatal { worker_id: usize },

    #[error("drain timed out after {polls} polls")]
    DrainTimeout { polls: u32 },

    #[error("worker pool exhausted: no free or busy workers remain")]
    PoolExhausted,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
