pub mod backend;
pub mod findlanes;
pub mod geometry;
pub mod io;
pub mod threshold;
pub mod warp;

pub use backend::Backend;
pub use findlanes::CpuFindLanes;
pub use io::{DirFrameSink, DirFrameSource};
pub use threshold::CpuThreshold;
pub use warp::CpuWarp;

#[cfg(feature = "gpu")]
pub use backend::gpu;
