use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgb};
use ndarray::Array3;

use lanepipe_core::{AnnotatedFrame, FrameSink, FrameSource, Result, SchedulerError};

/// Reads frames from a directory of images, sorted by filename, one frame
/// per file. A stand-in for real video decoding (out of scope, spec §2
/// Non-goals), grounded on the same "sequence of still frames" contract a
/// file-backed FrameSource gives the scheduler.
pub struct DirFrameSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl DirFrameSource {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())
            .map_err(|e| SchedulerError::SourceFailure(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(Self { files, cursor: 0 })
    }
}

impl FrameSource for DirFrameSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Array3<f32>>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let img = image::open(path)
            .map_err(|e| SchedulerError::SourceFailure(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let (w, h) = img.dimensions();
        let mut out = Array3::<f32>::zeros((h as usize, w as usize, 3));
        for (x, y, px) in img.enumerate_pixels() {
            let [r, g, b] = px.0;
            out[[y as usize, x as usize, 0]] = b as f32 / 255.0;
            out[[y as usize, x as usize, 1]] = g as f32 / 255.0;
            out[[y as usize, x as usize, 2]] = r as f32 / 255.0;
        }
        Ok(Some(out))
    }

    fn close(&mut self) {}
}

/// Writes annotated frames as `frame_%08d.png` into a directory.
pub struct DirFrameSink {
    dir: PathBuf,
}

impl DirFrameSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FrameSink for DirFrameSink {
    fn open(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SchedulerError::SourceFailure(e.to_string()))
    }

    fn write(&mut self, frame: AnnotatedFrame) -> Result<()> {
        let (h, w, _) = frame.image.dim();
        let mut img = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(w as u32, h as u32);
        for y in 0..h {
            for x in 0..w {
                let b = (frame.image[[y, x, 0]].clamp(0.0, 1.0) * 255.0) as u8;
                let g = (frame.image[[y, x, 1]].clamp(0.0, 1.0) * 255.0) as u8;
                let r = (frame.image[[y, x, 2]].clamp(0.0, 1.0) * 255.0) as u8;
                img.put_pixel(x as u32, y as u32, Rgb([r, g, b]));
            }
        }
        let path = self.dir.join(format!("frame_{:08}.png", frame.frame_index));
        img.save(&path)
            .map_err(|e| SchedulerError::SourceFailure(format!("{}: {e}", path.display())))
    }

    fn close(&mut self) {}
}
