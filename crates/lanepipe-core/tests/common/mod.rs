use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::Array3;

use lanepipe_core::{
    AnnotatedFrame, FindLanesInstance, FindLanesOutput, FindLanesStep, Frame, FrameSink,
    FrameSource, LaneHistory, Result, StageInstance, StepList, ThreshStep, ThresholdInstance,
    ThresholdOutput, WarpInstance, WarpOutput, WarpStep,
};

const DIM: (usize, usize) = (4, 4);

pub fn blank_frame() -> Array3<f32> {
    Array3::zeros((DIM.0, DIM.1, 3))
}

/// Single sub-step pass-through Warp instance.
pub struct MockWarp {
    steps: Mutex<StepList<WarpStep>>,
    frame: Mutex<Option<Frame>>,
}

impl MockWarp {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(StepList::new()),
            frame: Mutex::new(None),
        }
    }
}

impl StageInstance for MockWarp {
    type SubStep = WarpStep;
    type Input = Frame;
    type Output = WarpOutput;

    fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
        f(&self.steps.lock().unwrap())
    }

    fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
        f(&mut self.steps.lock().unwrap())
    }

    fn is_bound(&self) -> bool {
        self.frame.lock().unwrap().is_some()
    }

    fn bind(&self, input: Self::Input) {
        *self.frame.lock().unwrap() = Some(input);
        self.with_steps_mut(|s| *s = StepList::from_wave([WarpStep::RunWarp]));
    }

    fn execute(&self, _step: Self::SubStep) -> Result<()> {
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
    }

    fn output(&self) -> Self::Output {
        let frame = self.frame.lock().unwrap();
        let frame = frame.as_ref().expect("warp output without binding");
        WarpOutput {
            frame_index: frame.frame_index,
            warped: frame.clone(),
        }
    }

    fn release(&self) {
        *self.frame.lock().unwrap() = None;
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl WarpInstance for MockWarp {}

/// Single sub-step pass-through Threshold instance.
pub struct MockThreshold {
    steps: Mutex<StepList<ThreshStep>>,
    input: Mutex<Option<WarpOutput>>,
}

impl MockThreshold {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(StepList::new()),
            input: Mutex::new(None),
        }
    }
}

impl StageInstance for MockThreshold {
    type SubStep = ThreshStep;
    type Input = WarpOutput;
    type Output = ThresholdOutput;

    fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
        f(&self.steps.lock().unwrap())
    }

    fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
        f(&mut self.steps.lock().unwrap())
    }

    fn is_bound(&self) -> bool {
        self.input.lock().unwrap().is_some()
    }

    fn bind(&self, input: Self::Input) {
        *self.input.lock().unwrap() = Some(input);
        self.with_steps_mut(|s| *s = StepList::from_wave([ThreshStep::CombineThresh]));
    }

    fn execute(&self, _step: Self::SubStep) -> Result<()> {
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
    }

    fn output(&self) -> Self::Output {
        let input = self.input.lock().unwrap();
        let input = input.as_ref().expect("thresh output without binding");
        let (h, w) = DIM;
        ThresholdOutput {
            frame_index: input.frame_index,
            warped: input.warped.clone(),
            mask: ndarray::Array2::zeros((h, w)),
        }
    }

    fn release(&self) {
        *self.input.lock().unwrap() = None;
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl ThresholdInstance for MockThreshold {
    fn parallel_mode(&self) -> bool {
        false
    }
}

/// Single sub-step FindLanes instance. Always reports detection with a
/// fixed steering angle; an optional shared delay table lets tests stall
/// a specific frame_index to exercise strict/skip-late ordering.
pub struct MockFindLanes {
    steps: Mutex<StepList<FindLanesStep>>,
    input: Mutex<Option<ThresholdOutput>>,
    history: Mutex<Option<LaneHistory>>,
    delays: Arc<Mutex<HashMap<u64, Duration>>>,
}

impl MockFindLanes {
    pub fn new(delays: Arc<Mutex<HashMap<u64, Duration>>>) -> Self {
        Self {
            steps: Mutex::new(StepList::new()),
            input: Mutex::new(None),
            history: Mutex::new(None),
            delays,
        }
    }
}

impl StageInstance for MockFindLanes {
    type SubStep = FindLanesStep;
    type Input = ThresholdOutput;
    type Output = FindLanesOutput;

    fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
        f(&self.steps.lock().unwrap())
    }

    fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
        f(&mut self.steps.lock().unwrap())
    }

    fn is_bound(&self) -> bool {
        self.input.lock().unwrap().is_some()
    }

    fn bind(&self, input: Self::Input) {
        *self.input.lock().unwrap() = Some(input);
        self.with_steps_mut(|s| *s = StepList::from_wave([FindLanesStep::Run]));
    }

    fn execute(&self, _step: Self::SubStep) -> Result<()> {
        let frame_index = self.input.lock().unwrap().as_ref().unwrap().frame_index;
        let delay = self.delays.lock().unwrap().get(&frame_index).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
    }

    fn output(&self) -> Self::Output {
        let input = self.input.lock().unwrap();
        let input = input.as_ref().expect("find output without binding");
        FindLanesOutput {
            frame_index: input.frame_index,
            annotated: input.warped.data.clone(),
            steering_angle: 0.0,
            detected: true,
            lane_history: self
                .history
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| LaneHistory::initial(DIM.1)),
        }
    }

    fn release(&self) {
        *self.input.lock().unwrap() = None;
        *self.history.lock().unwrap() = None;
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl FindLanesInstance for MockFindLanes {
    fn set_lane_history(&self, history: LaneHistory) {
        *self.history.lock().unwrap() = Some(history);
    }
}

/// Produces `count` blank frames, then exhausts.
pub struct MockSource {
    remaining: u64,
}

impl MockSource {
    pub fn new(count: u64) -> Self {
        Self { remaining: count }
    }
}

impl FrameSource for MockSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Array3<f32>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(blank_frame()))
    }

    fn close(&mut self) {}
}

/// Collects every emitted frame in arrival order.
#[derive(Clone, Default)]
pub struct MockSink {
    pub frames: Arc<Mutex<Vec<AnnotatedFrame>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for MockSink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, frame: AnnotatedFrame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&mut self) {}
}
