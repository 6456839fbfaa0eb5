use std::sync::Mutex;

use ndarray::Array2;
use tracing::debug;

use lanepipe_core::{
    FindLanesInstance, FindLanesOutput, FindLanesStep, LaneHistory, Result, StageInstance,
    StepList, ThresholdOutput,
};

const MARGIN: f64 = 0.20;
const MIN_MASS: f32 = 6.0;

struct FindState {
    input: Option<ThresholdOutput>,
    history: Option<LaneHistory>,
    result: Option<(f64, bool)>,
}

/// Histogram/sliding-window lane estimate over the bottom half of the
/// threshold mask, carrying the previous frame's lane bases forward as the
/// search window center (spec §4.2 `lane_history`). One sub-step per
/// frame, so the single inner `Mutex` sees no cross-worker contention.
pub struct CpuFindLanes {
    steps: Mutex<StepList<FindLanesStep>>,
    state: Mutex<FindState>,
}

impl CpuFindLanes {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(StepList::new()),
            state: Mutex::new(FindState {
                input: None,
                history: None,
                result: None,
            }),
        }
    }
}

impl Default for CpuFindLanes {
    fn default() -> Self {
        Self::new()
    }
}

impl StageInstance for CpuFindLanes {
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
        self.state.lock().unwrap().input.is_some()
    }

    fn bind(&self, input: Self::Input) {
        {
            let mut state = self.state.lock().unwrap();
            state.input = Some(input);
            state.result = None;
        }
        self.with_steps_mut(|s| *s = StepList::from_wave([FindLanesStep::Run]));
    }

    fn execute(&self, _step: Self::SubStep) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (frame_index, width, mask) = {
            let input = state.input.as_ref().expect("Run without a bound frame");
            (input.frame_index, input.warped.width(), input.mask.clone())
        };
        let history = state
            .history
            .clone()
            .unwrap_or_else(|| LaneHistory::initial(width));

        let (left, right) = find_lane_bases(&mask, &history, width as f64);
        let detected = left.is_some() && right.is_some();

        if let (Some(left_x), Some(right_x)) = (left, right) {
            let center = (left_x + right_x) / 2.0;
            let offset = center - (width as f64 / 2.0);
            let steering_angle = (offset / (width as f64 / 2.0)).clamp(-1.0, 1.0);
            state.history = Some(LaneHistory {
                left_x_base: left_x,
                right_x_base: right_x,
                lane_width: right_x - left_x,
            });
            state.result = Some((steering_angle, true));
        } else {
            state.result = Some((0.0, false));
        }
        debug!(frame_index, detected, "lane search complete");
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
    }

    fn output(&self) -> Self::Output {
        let state = self.state.lock().unwrap();
        let input = state.input.as_ref().expect("output without a bound frame");
        let (steering_angle, detected) = state.result.unwrap_or((0.0, false));
        let history = state
            .history
            .clone()
            .unwrap_or_else(|| LaneHistory::initial(input.warped.width()));
        FindLanesOutput {
            frame_index: input.frame_index,
            annotated: input.warped.data.clone(),
            steering_angle,
            detected,
            lane_history: history,
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.input = None;
            state.history = None;
            state.result = None;
        }
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl FindLanesInstance for CpuFindLanes {
    fn set_lane_history(&self, history: LaneHistory) {
        self.state.lock().unwrap().history = Some(history);
    }
}

/// Column-sum histogram over the bottom half of the mask, searched within
/// `MARGIN * width` of the carried-forward base on each side.
fn find_lane_bases(mask: &Array2<f32>, history: &LaneHistory, width: f64) -> (Option<f64>, Option<f64>) {
    let (h, w) = mask.dim();
    let bottom_half = h / 2;
    let mut columns = vec![0.0f32; w];
    for y in bottom_half..h {
        for x in 0..w {
            columns[x] += mask[[y, x]];
        }
    }

    let margin = (MARGIN * width) as usize;
    let left = search_window(&columns, history.left_x_base as usize, margin);
    let right = search_window(&columns, history.right_x_base as usize, margin);
    (left, right)
}

fn search_window(columns: &[f32], center: usize, margin: usize) -> Option<f64> {
    let lo = center.saturating_sub(margin);
    let hi = (center + margin).min(columns.len().saturating_sub(1));
    if lo >= hi {
        return None;
    }
    let mut best_x = lo;
    let mut best_mass = 0.0f32;
    for (x, &mass) in columns.iter().enumerate().take(hi + 1).skip(lo) {
        if mass > best_mass {
            best_mass = mass;
            best_x = x;
        }
    }
    if best_mass >= MIN_MASS {
        Some(best_x as f64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanepipe_core::Frame;
    use ndarray::Array3;

    fn masked_input(width: usize, left: usize, right: usize) -> ThresholdOutput {
        let height = 20;
        let mut mask = Array2::<f32>::zeros((height, width));
        for y in height / 2..height {
            mask[[y, left]] = 1.0;
            mask[[y, right]] = 1.0;
        }
        ThresholdOutput {
            frame_index: 0,
            warped: Frame::new(Array3::zeros((height, width, 3)), 0),
            mask,
        }
    }

    #[test]
    fn detects_two_well_separated_lanes() {
        let find = CpuFindLanes::new();
        find.set_lane_history(LaneHistory::initial(100));
        find.bind(masked_input(100, 20, 80));
        find.execute(FindLanesStep::Run).unwrap();
        let out = find.output();
        assert!(out.detected);
        assert!(out.steering_angle.abs() < 0.1);
    }

    #[test]
    fn no_mass_in_window_reports_not_detected() {
        let find = CpuFindLanes::new();
        find.set_lane_history(LaneHistory::initial(100));
        let height = 20;
        let input = ThresholdOutput {
            frame_index: 0,
            warped: Frame::new(Array3::zeros((height, 100, 3)), 0),
            mask: Array2::zeros((height, 100)),
        };
        find.bind(input);
        find.execute(FindLanesStep::Run).unwrap();
        assert!(!find.output().detected);
    }
}
