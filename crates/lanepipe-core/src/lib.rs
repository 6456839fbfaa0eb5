pub mod error;
pub mod frame;
pub mod instance;
pub mod io;
pub mod scheduler;
pub mod stage;
pub mod stats;
pub mod step;
pub mod substep;
pub mod worker;

pub use error::{Result, SchedulerError};
pub use frame::{AnnotatedFrame, Frame};
pub use instance::{
    FindLanesInstance, FindLanesOutput, LaneHistory, StageInstance, ThresholdInstance,
    ThresholdOutput, WarpInstance, WarpOutput,
};
pub use io::{FrameSink, FrameSource};
pub use scheduler::{EmitOrder, Scheduler, SchedulerConfig, SchedulerMsg, ShutdownReport};
pub use stage::StageKind;
pub use stats::DurationLog;
pub use step::{StepList, StepState};
pub use substep::{FindLanesStep, SubStepName, ThreshStep, WarpStep};
