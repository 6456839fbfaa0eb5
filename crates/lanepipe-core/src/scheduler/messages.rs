use std::time::Duration;

use crate::error::SchedulerError;
use crate::stage::StageKind;

pub enum SchedulerMsg {
    Start,
    CompleteStep {
        stage: StageKind,
        slot: usize,
        sub_step_name: &'static str,
        worker_id: usize,
        result: Result<(), SchedulerError>,
        duration: Duration,
    },
    /// Coalesced self-message: "re-enter drive_all, a previous dispatch
    /// stalled on an empty worker pool". Posted through `UniqueSlot` so
    /// bursts of completions collapse to at most one pending `Poke`.
    Poke,
    Stop,
}
