use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::frame::{AnnotatedFrame, Frame};
use crate::instance::{
    FindLanesInstance, FindLanesOutput, LaneHistory, StageInstance, ThresholdInstance,
    ThresholdOutput, WarpInstance, WarpOutput,
};
use crate::io::{FrameSink, FrameSource};
use crate::scheduler::config::{EmitOrder, SchedulerConfig};
use crate::scheduler::messages::SchedulerMsg;
use crate::stage::StageKind;
use crate::stats::DurationLog;
use crate::step::StepState;
use crate::substep::SubStepName;
use crate::worker::{self, Job, RunMessage, WorkerHandle};

const DRAIN_POLL: Duration = Duration::from_millis(50);
const DRAIN_MAX_POLLS: u32 = 200;

/// Final tally handed back once the scheduler loop exits (spec §7).
#[derive(Clone, Debug, Default)]
pub struct ShutdownReport {
    pub frames_processed: u64,
    pub dropped_frames: u64,
    pub lost_workers: u64,
    pub drain_timed_out: bool,
    /// Per-sub-step average duration, sorted by name (spec §3 duration tracking).
    pub durations: Vec<(&'static str, Duration)>,
}

/// Drives `pipeline_depth` instances of each of the three stages through a
/// fixed-size worker pool (spec §4). Generic over the concrete backend so
/// the CPU/GPU choice is a compile-time pairing fixed at construction — the
/// scheduler itself never downcasts or matches on backend kind.
pub struct Scheduler<W, Th, Fi>
where
    W: WarpInstance + 'static,
    Th: ThresholdInstance + 'static,
    Fi: FindLanesInstance + 'static,
{
    config: SchedulerConfig,
    workers: Vec<WorkerHandle>,
    free: VecDeque<usize>,
    busy: HashSet<usize>,

    // One `Arc` per slot, no outer lock: each instance manages its own
    // interior mutability so independent sub-steps of one wave can run on
    // distinct Worker threads without contending on a single mutex.
    warp: Vec<Arc<W>>,
    thresh: Vec<Arc<Th>>,
    find: Vec<Arc<Fi>>,

    warp_pending: bool,
    thresh_pending: bool,
    find_pending: bool,
    poke_pending: bool,

    in_flight: u64,
    frame_cnt: u64,
    processed_cnt: u64,
    source_exhausted: bool,

    dropped_frames: u64,
    lost_workers: u64,

    // Set by an external `Stop`, a non-recoverable `StageFailure`, or a
    // worker-pool exhaustion event; the run loop checks it every iteration
    // and, once set, proceeds straight to drain + stop-all-workers (spec §7).
    shutting_down: bool,
    pool_exhausted: bool,

    lane_history: Option<LaneHistory>,
    durations: DurationLog,

    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,

    tx: mpsc::Sender<SchedulerMsg>,
    rx: mpsc::Receiver<SchedulerMsg>,
}

impl<W, Th, Fi> Scheduler<W, Th, Fi>
where
    W: WarpInstance + 'static,
    Th: ThresholdInstance + 'static,
    Fi: FindLanesInstance + 'static,
{
    pub fn new(
        config: SchedulerConfig,
        mut make_warp: impl FnMut() -> W,
        mut make_thresh: impl FnMut() -> Th,
        mut make_find: impl FnMut() -> Fi,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel();

        let workers = (0..config.thread_pool_size)
            .map(|id| worker::spawn_worker(id, tx.clone()))
            .collect();
        let free = (0..config.thread_pool_size).collect();

        let warp = (0..config.pipeline_depth).map(|_| Arc::new(make_warp())).collect();
        let thresh = (0..config.pipeline_depth).map(|_| Arc::new(make_thresh())).collect();
        let find = (0..config.pipeline_depth).map(|_| Arc::new(make_find())).collect();

        Self {
            config,
            workers,
            free,
            busy: HashSet::new(),
            warp,
            thresh,
            find,
            warp_pending: false,
            thresh_pending: false,
            find_pending: false,
            poke_pending: false,
            in_flight: 0,
            frame_cnt: 0,
            processed_cnt: 0,
            source_exhausted: false,
            dropped_frames: 0,
            lost_workers: 0,
            shutting_down: false,
            pool_exhausted: false,
            lane_history: None,
            durations: DurationLog::new(),
            source,
            sink,
            tx,
            rx,
        }
    }

    /// A sender any external caller can use to post `SchedulerMsg::Stop` (or
    /// any other message) to this scheduler while `run()` is looping on
    /// another thread. Cloning is cheap (`mpsc::Sender` is itself an `Arc`
    /// around the queue).
    pub fn sender(&self) -> mpsc::Sender<SchedulerMsg> {
        self.tx.clone()
    }

    /// Run until the source is exhausted and every in-flight frame has
    /// drained, or until shutdown is triggered by an external `Stop`, a
    /// non-recoverable `StageFailure`, or the worker pool being exhausted.
    pub fn run(mut self) -> Result<ShutdownReport> {
        self.source.open()?;
        self.sink.open()?;

        self.try_start_frames();
        self.arm_poke_if_pending();

        loop {
            if self.source_exhausted && self.in_flight == 0 {
                break;
            }
            if self.shutting_down {
                break;
            }
            match self.rx.recv() {
                Ok(msg) => self.handle(msg),
                Err(_) => break,
            }
        }

        // A pool-exhaustion shutdown has no workers left to service a
        // drain, so there is nothing to wait for.
        let drain_timed_out = if self.shutting_down && !self.pool_exhausted {
            self.drain()
        } else {
            false
        };

        for w in &self.workers {
            w.stop();
        }
        for w in &mut self.workers {
            w.join();
        }
        self.source.close();
        self.sink.close();

        if self.pool_exhausted {
            return Err(SchedulerError::PoolExhausted);
        }

        Ok(ShutdownReport {
            frames_processed: self.processed_cnt,
            dropped_frames: self.dropped_frames,
            lost_workers: self.lost_workers,
            drain_timed_out,
            durations: self.durations.averages(),
        })
    }

    fn handle(&mut self, msg: SchedulerMsg) {
        match msg {
            SchedulerMsg::Start => {
                self.try_start_frames();
                self.arm_poke_if_pending();
            }
            SchedulerMsg::CompleteStep {
                stage,
                slot,
                sub_step_name,
                worker_id,
                result,
                duration,
            } => self.handle_complete(stage, slot, sub_step_name, worker_id, result, duration),
            SchedulerMsg::Poke => {
                self.poke_pending = false;
                self.drive_all();
                self.arm_poke_if_pending();
            }
            SchedulerMsg::Stop => self.shutting_down = true,
        }
    }

    /// Bounded wait for `in_flight` to reach zero after shutdown has been
    /// triggered. Returns whether the drain timed out.
    fn drain(&mut self) -> bool {
        for _ in 0..DRAIN_MAX_POLLS {
            if self.in_flight == 0 {
                return false;
            }
            match self.rx.recv_timeout(DRAIN_POLL) {
                Ok(SchedulerMsg::CompleteStep {
                    stage,
                    slot,
                    sub_step_name,
                    worker_id,
                    result,
                    duration,
                }) => self.handle_complete(stage, slot, sub_step_name, worker_id, result, duration),
                Ok(SchedulerMsg::Poke) => {
                    self.poke_pending = false;
                    self.drive_all();
                }
                Ok(SchedulerMsg::Start | SchedulerMsg::Stop) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.pool_exhausted {
                break;
            }
        }
        if self.in_flight != 0 {
            warn!(in_flight = self.in_flight, "drain timed out");
            true
        } else {
            false
        }
    }

    fn handle_complete(
        &mut self,
        stage: StageKind,
        slot: usize,
        sub_step_name: &'static str,
        worker_id: usize,
        result: Result<()>,
        duration: Duration,
    ) {
        self.durations.record(sub_step_name, duration);
        self.busy.remove(&worker_id);
        match &result {
            Err(SchedulerError::WorkerFatal { .. }) => {
                self.lost_workers += 1;
            }
            _ => self.free.push_back(worker_id),
        }

        // spec §7: "WorkerFatal — ... if free ∪ busy becomes empty,
        // Scheduler initiates shutdown."
        if self.free.is_empty() && self.busy.is_empty() {
            warn!("worker pool exhausted, initiating shutdown");
            self.pool_exhausted = true;
            self.shutting_down = true;
        }

        match result {
            Ok(()) => self.retag(stage, slot, sub_step_name, StepState::Completed),
            Err(SchedulerError::StageFailure { recoverable, .. }) => {
                // spec §7: recoverable -> the frame is abandoned; non-recoverable
                // -> the Scheduler initiates shutdown (in addition to abandoning
                // the frame that can no longer make progress).
                self.abort_frame(stage, slot);
                if !recoverable {
                    warn!(%stage, slot, "non-recoverable stage failure, initiating shutdown");
                    self.shutting_down = true;
                }
            }
            Err(SchedulerError::WorkerFatal { .. }) => {
                self.retag(stage, slot, sub_step_name, StepState::Initialized);
            }
            Err(other) => {
                warn!(%stage, slot, error = %other, "unexpected error on CompleteStep");
            }
        }

        match stage {
            StageKind::Warp => self.drive_warp(slot),
            StageKind::Threshold => self.drive_thresh(slot),
            StageKind::FindLanes => self.drive_find(slot),
        }

        // Fixed fallback order for whichever other stages still have
        // pending work: downstream before upstream (FindLanes, Threshold,
        // Warp), skipping the stage already driven above.
        if stage != StageKind::FindLanes && self.find_pending {
            self.drive_all_find();
        }
        if stage != StageKind::Threshold && self.thresh_pending {
            self.drive_all_thresh();
        }
        if stage != StageKind::Warp && self.warp_pending {
            self.drive_all_warp();
        }

        self.arm_poke_if_pending();
    }

    fn retag(&mut self, stage: StageKind, slot: usize, name: &str, state: StepState) {
        match stage {
            StageKind::Warp => self.warp[slot].retag_named(name, state),
            StageKind::Threshold => self.thresh[slot].retag_named(name, state),
            StageKind::FindLanes => self.find[slot].retag_named(name, state),
        }
    }

    fn abort_frame(&mut self, stage: StageKind, slot: usize) {
        match stage {
            StageKind::Warp => self.warp[slot].release(),
            StageKind::Threshold => self.thresh[slot].release(),
            StageKind::FindLanes => self.find[slot].release(),
        }
        self.dropped_frames += 1;
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn arm_poke_if_pending(&mut self) {
        if (self.warp_pending || self.thresh_pending || self.find_pending) && !self.poke_pending {
            self.poke_pending = true;
            let _ = self.tx.send(SchedulerMsg::Poke);
        }
    }

    /// Re-attempt every stage with an outstanding pending flag, downstream
    /// first. Entry point for the coalesced `Poke` message.
    fn drive_all(&mut self) {
        if self.find_pending {
            self.drive_all_find();
        }
        if self.thresh_pending {
            self.drive_all_thresh();
        }
        if self.warp_pending {
            self.drive_all_warp();
        }
        self.try_start_frames();
    }

    fn drive_all_warp(&mut self) {
        self.warp_pending = false;
        for slot in 0..self.warp.len() {
            self.drive_warp(slot);
        }
    }

    fn drive_all_thresh(&mut self) {
        self.thresh_pending = false;
        for slot in 0..self.thresh.len() {
            self.drive_thresh(slot);
        }
    }

    fn drive_all_find(&mut self) {
        self.find_pending = false;
        for slot in 0..self.find.len() {
            self.drive_find(slot);
        }
    }

    // ---- Warp -------------------------------------------------------

    fn drive_warp(&mut self, slot: usize) {
        if self.warp[slot].steps_is_done() {
            let snapshot = self.warp[slot].steps_snapshot();
            self.warp[slot].advance_wave();
            if self.warp[slot].steps_is_empty() && !self.handoff_warp(slot) {
                self.warp[slot].restore_steps(snapshot);
                self.warp_pending = true;
            }
        }
        self.dispatch_warp(slot);
        self.try_start_frames();
    }

    fn dispatch_warp(&mut self, slot: usize) {
        let ready = self.warp[slot].ready_steps();
        for step in ready {
            let Some(worker_id) = self.free.pop_front() else {
                self.warp_pending = true;
                break;
            };
            self.busy.insert(worker_id);
            self.warp[slot].mark_running(step);
            let inst = Arc::clone(&self.warp[slot]);
            let job: Job = Box::new(move || inst.execute(step));
            self.workers[worker_id].send_run(RunMessage {
                stage: StageKind::Warp,
                slot,
                sub_step_name: step.name(),
                job,
            });
        }
    }

    fn handoff_warp(&mut self, slot: usize) -> bool {
        let Some(target) = self.find_empty(&self.thresh) else {
            return false;
        };
        let output: WarpOutput = self.warp[slot].output();
        self.warp[slot].release();
        self.thresh[target].bind(output);
        self.dispatch_thresh(target);
        true
    }

    // ---- Threshold ----------------------------------------------------

    fn drive_thresh(&mut self, slot: usize) {
        if self.thresh[slot].steps_is_done() {
            let snapshot = self.thresh[slot].steps_snapshot();
            self.thresh[slot].advance_wave();
            if self.thresh[slot].steps_is_empty() && !self.handoff_thresh(slot) {
                self.thresh[slot].restore_steps(snapshot);
                self.thresh_pending = true;
            }
        }
        self.dispatch_thresh(slot);
        self.try_start_frames();
    }

    /// Dispatches every currently-`Initialized` sub-step of the slot's wave
    /// to its own free worker. Each job closure only holds an `Arc` clone
    /// of the instance and calls `execute(step)` directly — no per-slot
    /// lock is taken here, so in parallel mode a wave with N independent
    /// sub-steps and N free workers genuinely runs with N-way fan-out.
    fn dispatch_thresh(&mut self, slot: usize) {
        let ready = self.thresh[slot].ready_steps();
        for step in ready {
            let Some(worker_id) = self.free.pop_front() else {
                self.thresh_pending = true;
                break;
            };
            self.busy.insert(worker_id);
            self.thresh[slot].mark_running(step);
            let inst = Arc::clone(&self.thresh[slot]);
            let job: Job = Box::new(move || inst.execute(step));
            self.workers[worker_id].send_run(RunMessage {
                stage: StageKind::Threshold,
                slot,
                sub_step_name: step.name(),
                job,
            });
        }
    }

    fn handoff_thresh(&mut self, slot: usize) -> bool {
        let Some(target) = self.find_empty(&self.find) else {
            return false;
        };
        let output: ThresholdOutput = self.thresh[slot].output();
        self.thresh[slot].release();

        let width = output.warped.width();
        let history = self
            .lane_history
            .clone()
            .unwrap_or_else(|| LaneHistory::initial(width));
        self.find[target].set_lane_history(history);
        self.find[target].bind(output);
        self.dispatch_find(target);
        true
    }

    // ---- FindLanes ------------------------------------------------------

    fn drive_find(&mut self, slot: usize) {
        if self.find[slot].steps_is_done() {
            let snapshot = self.find[slot].steps_snapshot();
            self.find[slot].advance_wave();
            if self.find[slot].steps_is_empty() && !self.handoff_find(slot) {
                self.find[slot].restore_steps(snapshot);
                self.find_pending = true;
            }
        }
        self.dispatch_find(slot);
        self.try_start_frames();
    }

    fn dispatch_find(&mut self, slot: usize) {
        let ready = self.find[slot].ready_steps();
        for step in ready {
            let Some(worker_id) = self.free.pop_front() else {
                self.find_pending = true;
                break;
            };
            self.busy.insert(worker_id);
            self.find[slot].mark_running(step);
            let inst = Arc::clone(&self.find[slot]);
            let job: Job = Box::new(move || inst.execute(step));
            self.workers[worker_id].send_run(RunMessage {
                stage: StageKind::FindLanes,
                slot,
                sub_step_name: step.name(),
                job,
            });
        }
    }

    /// Emit to the sink or, in strict mode, decline and let the caller roll
    /// back and retry once `processed_cnt` catches up (spec §4.3, §9 OQ2).
    fn handoff_find(&mut self, slot: usize) -> bool {
        let output: FindLanesOutput = self.find[slot].output();

        match self.config.emit_order {
            EmitOrder::Strict => {
                if output.frame_index != self.processed_cnt {
                    return false;
                }
                self.processed_cnt += 1;
                self.emit(output);
            }
            EmitOrder::SkipLate => {
                if output.frame_index < self.processed_cnt {
                    debug!(frame = output.frame_index, "dropping late frame");
                    self.dropped_frames += 1;
                } else {
                    self.processed_cnt = output.frame_index + 1;
                    self.emit(output);
                }
            }
        }

        self.find[slot].release();
        self.in_flight = self.in_flight.saturating_sub(1);
        true
    }

    fn emit(&mut self, output: FindLanesOutput) {
        if output.detected {
            self.lane_history = Some(output.lane_history.clone());
        }
        if self.config.delay_us > 0 {
            std::thread::sleep(Duration::from_micros(self.config.delay_us));
        }
        let annotated = AnnotatedFrame {
            frame_index: output.frame_index,
            image: output.annotated,
            steering_angle: output.steering_angle,
            detected: output.detected,
        };
        if let Err(err) = self.sink.write(annotated) {
            warn!(frame = output.frame_index, error = %err, "sink write failed");
        }
    }

    // ---- Ingress --------------------------------------------------------

    fn try_start_frames(&mut self) {
        loop {
            if self.source_exhausted || self.shutting_down {
                return;
            }
            if self.in_flight >= self.config.pipeline_depth as u64 {
                return;
            }
            if let Some(max) = self.config.max_frames {
                if self.frame_cnt >= max {
                    self.source_exhausted = true;
                    return;
                }
            }
            let Some(slot) = self.find_empty(&self.warp) else {
                return;
            };

            let data = match self.source.read() {
                Ok(Some(data)) => data,
                Ok(None) => {
                    self.source_exhausted = true;
                    info!(frames = self.frame_cnt, "source exhausted");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "source read failed, stopping ingress");
                    self.source_exhausted = true;
                    return;
                }
            };

            let frame_index = self.frame_cnt;
            self.frame_cnt += 1;
            self.in_flight += 1;
            self.warp[slot].bind(Frame::new(data, frame_index));
            self.dispatch_warp(slot);
        }
    }

    fn find_empty<T: StageInstance>(&self, slots: &[Arc<T>]) -> Option<usize> {
        slots.iter().position(|s| !s.is_bound())
    }
}
