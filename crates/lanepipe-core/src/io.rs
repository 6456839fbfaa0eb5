use ndarray::Array3;

use crate::error::Result;
use crate::frame::AnnotatedFrame;

/// Opaque provider of input frames (spec §6). Implementations live outside
/// the scheduler core — video decoding is out of scope here.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<()>;
    /// `Ok(None)` signals `SourceExhausted` (normal termination).
    fn read(&mut self) -> Result<Option<Array3<f32>>>;
    fn close(&mut self);
}

/// Opaque consumer of annotated output frames (spec §6).
pub trait FrameSink: Send {
    fn open(&mut self) -> Result<()>;
    fn write(&mut self, frame: AnnotatedFrame) -> Result<()>;
    fn close(&mut self);
}
