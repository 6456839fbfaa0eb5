use serde::{Deserialize, Serialize};

pub const MAX_PIPELINE_DEPTH: usize = 16;
pub const MAX_THREAD_POOL_SIZE: usize = 64;

/// Egress ordering policy (spec §4.3 `handoff_downstream`, §9 Open Question 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmitOrder {
    /// Sink accepts only `frame_index == processed_cnt`; frames that would
    /// arrive out of order are held back (never dropped) until their turn.
    #[default]
    Strict,
    /// Sink accepts `frame_index >= processed_cnt`; strictly-older frames
    /// are dropped. `processed_cnt` advances to `frame_index + 1`.
    SkipLate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub video_file: String,
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    /// `None` = unbounded ingress.
    #[serde(default)]
    pub max_frames: Option<u64>,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub delay_us: u64,
    #[serde(default)]
    pub parallel_mode: bool,
    #[serde(default)]
    pub gpu_accel: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub emit_order: EmitOrder,
}

fn default_thread_pool_size() -> usize {
    8
}

fn default_pipeline_depth() -> usize {
    3
}

fn default_speed() -> f64 {
    1000.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            video_file: String::new(),
            thread_pool_size: default_thread_pool_size(),
            pipeline_depth: default_pipeline_depth(),
            max_frames: None,
            speed: default_speed(),
            delay_us: 0,
            parallel_mode: false,
            gpu_accel: false,
            verbose: false,
            emit_order: EmitOrder::default(),
        }
    }
}

impl SchedulerConfig {
    /// Clamp `pipeline_depth`/`thread_pool_size` to their documented bounds.
    pub fn normalized(mut self) -> Self {
        if self.pipeline_depth == 0 {
            self.pipeline_depth = 1;
        }
        if self.pipeline_depth > MAX_PIPELINE_DEPTH {
            self.pipeline_depth = MAX_PIPELINE_DEPTH;
        }
        if self.thread_pool_size == 0 {
            self.thread_pool_size = 1;
        }
        if self.thread_pool_size > MAX_THREAD_POOL_SIZE {
            self.thread_pool_size = MAX_THREAD_POOL_SIZE;
        }
        self
    }
}
