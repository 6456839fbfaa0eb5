use crate::error::Result;
use crate::frame::Frame;
use crate::step::{StepList, StepState};
use crate::substep::{FindLanesStep, SubStepName, ThreshStep, WarpStep};

/// External interface the scheduler sees for a stage slot (spec §4.2).
///
/// Implementors are free to pick whichever concrete backend (CPU, GPU, ...)
/// at construction time; the scheduler only ever talks to this trait and
/// never downcasts (see DESIGN NOTES in SPEC_FULL.md).
///
/// Every method takes `&self`: the scheduler hands out a plain `Arc<Self>`
/// per slot (no outer lock), so implementors own their interior mutability.
/// This is what lets two independent sub-steps of one parallel-mode wave
/// run on two different Worker threads at the same time instead of
/// serializing on a single per-slot mutex.
pub trait StageInstance: Send + Sync {
    type SubStep: Copy + Eq + std::fmt::Debug + std::fmt::Display + SubStepName;
    type Input;
    type Output: Clone;

    /// Borrow the current step list for reading.
    fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R;
    /// Borrow the current step list for mutation.
    fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R;

    /// Whether a frame is currently bound to this slot.
    fn is_bound(&self) -> bool;

    /// Attach a frame; resets the step list to the initial wave.
    fn bind(&self, input: Self::Input);

    /// Run one sub-step. Blocking from the Worker's point of view. Touches
    /// only whatever fields that sub-step owns, so concurrent calls for
    /// disjoint sub-steps of the same wave never contend with each other.
    fn execute(&self, step: Self::SubStep) -> Result<()>;

    /// Called when the current wave `is_done()`. Computes the next wave,
    /// populating the step list with `Initialized` entries, or leaves it
    /// empty to signal stage completion for the bound frame.
    fn advance_wave(&self);

    /// Produce whatever the downstream stage needs.
    fn output(&self) -> Self::Output;

    /// Drop the frame binding.
    fn release(&self);

    fn steps_is_done(&self) -> bool {
        self.with_steps(|s| s.is_done())
    }

    fn steps_is_empty(&self) -> bool {
        self.with_steps(|s| s.is_empty())
    }

    fn steps_snapshot(&self) -> StepList<Self::SubStep> {
        self.with_steps(|s| s.clone())
    }

    fn restore_steps(&self, snapshot: StepList<Self::SubStep>) {
        self.with_steps_mut(|s| *s = snapshot);
    }

    fn ready_steps(&self) -> Vec<Self::SubStep> {
        self.with_steps(|s| s.initialized().collect())
    }

    fn mark_running(&self, step: Self::SubStep) {
        self.with_steps_mut(|s| s.set_state(step, StepState::Running));
    }

    /// Retag the entry matching a `CompleteStep` message's `&'static str`
    /// name back to `state`.
    fn retag_named(&self, name: &str, state: StepState) {
        self.with_steps_mut(|s| s.retag_named(name, state));
    }
}

/// Output handle Warp passes to Threshold.
#[derive(Clone, Debug)]
pub struct WarpOutput {
    pub frame_index: u64,
    pub warped: Frame,
}

/// Output handle Threshold passes to FindLanes.
#[derive(Clone, Debug)]
pub struct ThresholdOutput {
    pub frame_index: u64,
    pub warped: Frame,
    pub mask: ndarray::Array2<f32>,
}

/// Result FindLanes hands back to the scheduler on completion.
#[derive(Clone, Debug)]
pub struct FindLanesOutput {
    pub frame_index: u64,
    pub annotated: ndarray::Array3<f32>,
    pub steering_angle: f64,
    pub detected: bool,
    pub lane_history: LaneHistory,
}

/// Carried forward across frames; fed into the next FindLanes bind.
/// Only updated on successful detection (spec §4.3 `handoff_downstream`).
#[derive(Clone, Debug)]
pub struct LaneHistory {
    pub left_x_base: f64,
    pub right_x_base: f64,
    pub lane_width: f64,
}

impl LaneHistory {
    pub fn initial(frame_width: usize) -> Self {
        Self {
            left_x_base: 0.0,
            right_x_base: (frame_width.saturating_sub(1)) as f64,
            lane_width: (frame_width.saturating_sub(1)) as f64,
        }
    }
}

/// Trait-object-friendly aliases used by the scheduler's instance arrays.
pub trait WarpInstance: StageInstance<SubStep = WarpStep, Input = Frame, Output = WarpOutput> {}
impl<T: StageInstance<SubStep = WarpStep, Input = Frame, Output = WarpOutput>> WarpInstance for T {}

pub trait ThresholdInstance:
    StageInstance<SubStep = ThreshStep, Input = WarpOutput, Output = ThresholdOutput>
{
    /// Whether this instance fans out independent sub-steps within a wave.
    fn parallel_mode(&self) -> bool;
}

pub trait FindLanesInstance:
    StageInstance<SubStep = FindLanesStep, Input = ThresholdOutput, Output = FindLanesOutput>
{
    /// Feed the carried-forward lane history in before the first sub-step runs.
    fn set_lane_history(&self, history: LaneHistory);
}
