use std::sync::{Mutex, RwLock};

use ndarray::Array2;
use tracing::debug;

use lanepipe_core::{
    Result, SchedulerError, StageInstance, StepList, StepState, SubStepName, ThreshStep,
    ThresholdInstance, ThresholdOutput, WarpOutput,
};

/// Sequential plan: one sub-step per wave, in catalog order (7 waves).
const SEQUENTIAL_PLAN: [&[ThreshStep]; 7] = [
    &[ThreshStep::SplitBgr],
    &[ThreshStep::ThreshRed],
    &[ThreshStep::SplitHls],
    &[ThreshStep::ThreshSat],
    &[ThreshStep::SobelX],
    &[ThreshStep::ThreshSobelX],
    &[ThreshStep::CombineThresh],
];

/// Parallel plan: independent branches fan out within a wave (4 waves).
const PARALLEL_PLAN: [&[ThreshStep]; 4] = [
    &[ThreshStep::SplitBgr, ThreshStep::SplitHls],
    &[ThreshStep::ThreshRed, ThreshStep::ThreshSat, ThreshStep::SobelX],
    &[ThreshStep::ThreshSobelX],
    &[ThreshStep::CombineThresh],
];

const RED_LO: f32 = 0.60;
const SAT_LO: f32 = 0.30;
const SOBEL_LO: f32 = 0.08;

/// Colour/gradient thresholding, split into independently schedulable
/// sub-steps so the scheduler can run them sequentially or fan them out
/// within a wave depending on `parallel_mode`.
///
/// Each intermediate buffer gets its own `Mutex` instead of one lock over
/// the whole instance: `SplitBgr` and `SplitHls` touch disjoint fields
/// (`red`/`gray` vs. `sat`), so two workers running them for the same wave
/// never block each other. `input` is an `RwLock` since every sub-step in
/// a wave reads it but none ever writes it during `execute`, so concurrent
/// readers don't contend either.
pub struct CpuThreshold {
    steps: Mutex<StepList<ThreshStep>>,
    wave: Mutex<usize>,
    parallel: bool,
    input: RwLock<Option<WarpOutput>>,

    red: Mutex<Option<Array2<f32>>>,
    sat: Mutex<Option<Array2<f32>>>,
    gray: Mutex<Option<Array2<f32>>>,
    sobel: Mutex<Option<Array2<f32>>>,

    thresh_red: Mutex<Option<Array2<f32>>>,
    thresh_sat: Mutex<Option<Array2<f32>>>,
    thresh_sobel: Mutex<Option<Array2<f32>>>,
    mask: Mutex<Option<Array2<f32>>>,
}

impl CpuThreshold {
    pub fn new(parallel: bool) -> Self {
        Self {
            steps: Mutex::new(StepList::new()),
            wave: Mutex::new(0),
            parallel,
            input: RwLock::new(None),
            red: Mutex::new(None),
            sat: Mutex::new(None),
            gray: Mutex::new(None),
            sobel: Mutex::new(None),
            thresh_red: Mutex::new(None),
            thresh_sat: Mutex::new(None),
            thresh_sobel: Mutex::new(None),
            mask: Mutex::new(None),
        }
    }

    fn plan(&self) -> &'static [&'static [ThreshStep]] {
        if self.parallel {
            &PARALLEL_PLAN
        } else {
            &SEQUENTIAL_PLAN
        }
    }

    fn fail(step: ThreshStep, message: impl Into<String>) -> SchedulerError {
        SchedulerError::StageFailure {
            stage: lanepipe_core::StageKind::Threshold,
            sub_step: step.name(),
            recoverable: false,
            message: message.into(),
        }
    }
}

impl StageInstance for CpuThreshold {
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
        self.input.read().unwrap().is_some()
    }

    fn bind(&self, input: Self::Input) {
        *self.input.write().unwrap() = Some(input);
        *self.wave.lock().unwrap() = 0;
        *self.red.lock().unwrap() = None;
        *self.sat.lock().unwrap() = None;
        *self.gray.lock().unwrap() = None;
        *self.sobel.lock().unwrap() = None;
        *self.thresh_red.lock().unwrap() = None;
        *self.thresh_sat.lock().unwrap() = None;
        *self.thresh_sobel.lock().unwrap() = None;
        *self.mask.lock().unwrap() = None;
        let first_wave = self.plan()[0];
        self.with_steps_mut(|s| *s = StepList::from_wave(first_wave.iter().copied()));
    }

    fn execute(&self, step: Self::SubStep) -> Result<()> {
        let input = self.input.read().unwrap();
        let warped = &input
            .as_ref()
            .ok_or_else(|| Self::fail(step, "execute without a bound frame"))?
            .warped;
        let (h, w, _) = warped.data.dim();
        debug!(sub_step = step.name(), "running threshold sub-step");

        match step {
            ThreshStep::SplitBgr => {
                let mut red = Array2::<f32>::zeros((h, w));
                let mut gray = Array2::<f32>::zeros((h, w));
                for y in 0..h {
                    for x in 0..w {
                        let b = warped.data[[y, x, 0]];
                        let g = warped.data[[y, x, 1]];
                        let r = warped.data[[y, x, 2]];
                        red[[y, x]] = r;
                        gray[[y, x]] = 0.114 * b + 0.587 * g + 0.299 * r;
                    }
                }
                *self.red.lock().unwrap() = Some(red);
                *self.gray.lock().unwrap() = Some(gray);
            }
            ThreshStep::ThreshRed => {
                let red = self.red.lock().unwrap();
                let red = red.as_ref().ok_or_else(|| Self::fail(step, "SplitBGR not run"))?;
                *self.thresh_red.lock().unwrap() = Some(red.mapv(|v| if v >= RED_LO { 1.0 } else { 0.0 }));
            }
            ThreshStep::SplitHls => {
                let mut sat = Array2::<f32>::zeros((h, w));
                for y in 0..h {
                    for x in 0..w {
                        let b = warped.data[[y, x, 0]];
                        let g = warped.data[[y, x, 1]];
                        let r = warped.data[[y, x, 2]];
                        let max = r.max(g).max(b);
                        let min = r.min(g).min(b);
                        let l = (max + min) / 2.0;
                        let s = if (max - min).abs() < f32::EPSILON {
                            0.0
                        } else if l > 0.5 {
                            (max - min) / (2.0 - max - min)
                        } else {
                            (max - min) / (max + min)
                        };
                        sat[[y, x]] = s;
                    }
                }
                *self.sat.lock().unwrap() = Some(sat);
            }
            ThreshStep::ThreshSat => {
                let sat = self.sat.lock().unwrap();
                let sat = sat.as_ref().ok_or_else(|| Self::fail(step, "SplitHLS not run"))?;
                *self.thresh_sat.lock().unwrap() = Some(sat.mapv(|v| if v >= SAT_LO { 1.0 } else { 0.0 }));
            }
            ThreshStep::SobelX => {
                let gray = self.gray.lock().unwrap();
                let gray = gray.as_ref().ok_or_else(|| Self::fail(step, "SplitBGR not run"))?;
                *self.sobel.lock().unwrap() = Some(sobel_x(gray));
            }
            ThreshStep::ThreshSobelX => {
                let sobel = self.sobel.lock().unwrap();
                let sobel = sobel.as_ref().ok_or_else(|| Self::fail(step, "SobelX not run"))?;
                *self.thresh_sobel.lock().unwrap() =
                    Some(sobel.mapv(|v| if v.abs() >= SOBEL_LO { 1.0 } else { 0.0 }));
            }
            ThreshStep::CombineThresh => {
                let red = self.thresh_red.lock().unwrap();
                let sat = self.thresh_sat.lock().unwrap();
                let sobel = self.thresh_sobel.lock().unwrap();
                let red = red.as_ref().ok_or_else(|| Self::fail(step, "ThreshRed not run"))?;
                let sat = sat.as_ref().ok_or_else(|| Self::fail(step, "ThreshSat not run"))?;
                let sobel = sobel
                    .as_ref()
                    .ok_or_else(|| Self::fail(step, "ThreshSobelX not run"))?;
                let mut combined = Array2::<f32>::zeros((h, w));
                for y in 0..h {
                    for x in 0..w {
                        let lit = red[[y, x]] > 0.0 || sat[[y, x]] > 0.0 || sobel[[y, x]] > 0.0;
                        combined[[y, x]] = if lit { 1.0 } else { 0.0 };
                    }
                }
                *self.mask.lock().unwrap() = Some(combined);
            }
        }
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
        let mut wave = self.wave.lock().unwrap();
        *wave += 1;
        let plan = self.plan();
        if *wave < plan.len() {
            let next = plan[*wave];
            self.with_steps_mut(|s| *s = StepList::from_wave(next.iter().copied()));
        }
    }

    fn output(&self) -> Self::Output {
        let input = self.input.read().unwrap();
        let input = input.as_ref().expect("output without a bound frame");
        ThresholdOutput {
            frame_index: input.frame_index,
            warped: input.warped.clone(),
            mask: self
                .mask
                .lock()
                .unwrap()
                .clone()
                .expect("output before CombineThresh ran"),
        }
    }

    fn release(&self) {
        *self.input.write().unwrap() = None;
        *self.wave.lock().unwrap() = 0;
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl ThresholdInstance for CpuThreshold {
    fn parallel_mode(&self) -> bool {
        self.parallel
    }
}

fn sobel_x(gray: &Array2<f32>) -> Array2<f32> {
    let (h, w) = gray.dim();
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let gx = -gray[[y - 1, x - 1]] + gray[[y - 1, x + 1]] - 2.0 * gray[[y, x - 1]]
                + 2.0 * gray[[y, x + 1]]
                - gray[[y + 1, x - 1]]
                + gray[[y + 1, x + 1]];
            out[[y, x]] = gx / 8.0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanepipe_core::Frame;
    use ndarray::Array3;

    fn warp_output(h: usize, w: usize) -> WarpOutput {
        let mut data = Array3::<f32>::zeros((h, w, 3));
        for x in w / 2..w {
            for y in 0..h {
                data[[y, x, 2]] = 1.0; // bright red half
            }
        }
        WarpOutput {
            frame_index: 0,
            warped: Frame::new(data, 0),
        }
    }

    fn run_all(thresh: &CpuThreshold) {
        loop {
            let ready = thresh.ready_steps();
            if ready.is_empty() {
                if thresh.steps_is_done() {
                    thresh.advance_wave();
                    if thresh.steps_is_empty() {
                        break;
                    }
                    continue;
                }
                break;
            }
            for step in ready {
                thresh.execute(step).unwrap();
                thresh.with_steps_mut(|s| s.set_state(step, StepState::Completed));
            }
        }
    }

    #[test]
    fn sequential_plan_has_seven_waves() {
        let thresh = CpuThreshold::new(false);
        thresh.bind(warp_output(10, 10));
        run_all(&thresh);
        assert_eq!(*thresh.wave.lock().unwrap(), 7);
        assert!(thresh.mask.lock().unwrap().is_some());
    }

    #[test]
    fn parallel_plan_has_four_waves() {
        let thresh = CpuThreshold::new(true);
        thresh.bind(warp_output(10, 10));
        run_all(&thresh);
        assert_eq!(*thresh.wave.lock().unwrap(), 4);
        assert!(thresh.mask.lock().unwrap().is_some());
    }

    #[test]
    fn bright_red_half_is_flagged_in_mask() {
        let thresh = CpuThreshold::new(false);
        thresh.bind(warp_output(10, 10));
        run_all(&thresh);
        let mask = thresh.mask.lock().unwrap();
        let mask = mask.as_ref().unwrap();
        assert!(mask[[5, 9]] > 0.0);
        assert_eq!(mask[[5, 0]], 0.0);
    }
}
