use std::sync::Mutex;

use ndarray::Array3;
use tracing::debug;

use lanepipe_core::{Frame, Result, StageInstance, StepList, WarpInstance, WarpOutput, WarpStep};

use crate::geometry::Perspective;

struct WarpState {
    frame: Option<Frame>,
    warped: Option<Array3<f32>>,
}

/// Bird's-eye perspective warp, the Rust counterpart of `warpPerspective`
/// against a fixed homography computed once at construction. Only one
/// sub-step exists per frame, so the interior `Mutex` sees no contention
/// between workers — it exists purely so the scheduler can hold a plain
/// `Arc<CpuWarp>` per slot, like the other two stages.
pub struct CpuWarp {
    forward: Perspective,
    steps: Mutex<StepList<WarpStep>>,
    state: Mutex<WarpState>,
}

impl CpuWarp {
    pub fn new(src_quad: [(f64, f64); 4], dst_quad: [(f64, f64); 4]) -> Self {
        Self {
            forward: Perspective::from_quad(src_quad, dst_quad),
            steps: Mutex::new(StepList::new()),
            state: Mutex::new(WarpState {
                frame: None,
                warped: None,
            }),
        }
    }

    /// The default trapezoid->rectangle quad used when no calibration is
    /// supplied, expressed as fractions of (width, height).
    pub fn default_for(width: usize, height: usize) -> Self {
        let w = width as f64;
        let h = height as f64;
        let src = [
            (w * 0.43, h * 0.63),
            (w * 0.58, h * 0.63),
            (w * 0.95, h * 0.95),
            (w * 0.10, h * 0.95),
        ];
        let dst = [(w * 0.20, 0.0), (w * 0.80, 0.0), (w * 0.80, h), (w * 0.20, h)];
        Self::new(src, dst)
    }
}

impl StageInstance for CpuWarp {
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
        self.state.lock().unwrap().frame.is_some()
    }

    fn bind(&self, input: Self::Input) {
        {
            let mut state = self.state.lock().unwrap();
            state.frame = Some(input);
            state.warped = None;
        }
        self.with_steps_mut(|s| *s = StepList::from_wave([WarpStep::RunWarp]));
    }

    fn execute(&self, _step: Self::SubStep) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let out = {
            let frame = state.frame.as_ref().expect("RunWarp without a bound frame");
            let (h, w, c) = frame.data.dim();
            debug!(frame_index = frame.frame_index, h, w, "running perspective warp");
            let inv = self.forward.inverse();
            let mut out = Array3::<f32>::zeros((h, w, c));
            for y in 0..h {
                for x in 0..w {
                    let (sx, sy) = inv.apply(x as f64, y as f64);
                    for ch in 0..c {
                        out[[y, x, ch]] = sample_bilinear(&frame.data, sx, sy, ch);
                    }
                }
            }
            out
        };
        state.warped = Some(out);
        Ok(())
    }

    fn advance_wave(&self) {
        self.with_steps_mut(|s| s.remove_completed());
    }

    fn output(&self) -> Self::Output {
        let state = self.state.lock().unwrap();
        let frame = state.frame.as_ref().expect("output without a bound frame");
        let warped_data = state.warped.clone().expect("output before RunWarp executed");
        let mut warped = frame.clone();
        warped.data = warped_data;
        WarpOutput {
            frame_index: frame.frame_index,
            warped,
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.frame = None;
            state.warped = None;
        }
        self.with_steps_mut(|s| *s = StepList::new());
    }
}

impl WarpInstance for CpuWarp {}

fn sample_bilinear(img: &Array3<f32>, x: f64, y: f64, channel: usize) -> f32 {
    let (h, w, _) = img.dim();
    if x < 0.0 || y < 0.0 || x >= (w - 1) as f64 || y >= (h - 1) as f64 {
        return 0.0;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let tl = img[[y0, x0, channel]];
    let tr = img[[y0, x0 + 1, channel]];
    let bl = img[[y0 + 1, x0, channel]];
    let br = img[[y0 + 1, x0 + 1, channel]];

    let top = tl + (tr - tl) * fx;
    let bot = bl + (br - bl) * fx;
    top + (bot - top) * fy
}
