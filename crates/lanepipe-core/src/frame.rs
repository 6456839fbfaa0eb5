use std::time::Instant;

use ndarray::Array3;

/// A single BGR video frame, row-major, shape = (height, width, 3).
/// Channel values are f32 in `[0.0, 1.0]`.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Array3<f32>,
    /// 0-based, strictly increasing in ingress order.
    pub frame_index: u64,
    pub start_time: Instant,
}

impl Frame {
    pub fn new(data: Array3<f32>, frame_index: u64) -> Self {
        Self {
            data,
            frame_index,
            start_time: Instant::now(),
        }
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }
}

/// Output of the full pipeline for one frame: the annotated image plus the
/// derived steering angle.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub frame_index: u64,
    pub image: Array3<f32>,
    pub steering_angle: f64,
    pub detected: bool,
}
