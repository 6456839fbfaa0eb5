use image::{ImageBuffer, Rgb};
use tempfile::tempdir;

use lanepipe_core::{Scheduler, SchedulerConfig};
use lanepipe_stages::{CpuFindLanes, CpuThreshold, CpuWarp, DirFrameSink, DirFrameSource};

fn write_test_frames(dir: &std::path::Path, count: usize) {
    for i in 0..count {
        let mut img = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(32, 32);
        for (x, _y, px) in img.enumerate_pixels_mut() {
            *px = if x >= 16 { Rgb([200, 40, 40]) } else { Rgb([20, 20, 20]) };
        }
        img.save(dir.join(format!("frame_{i:04}.png"))).unwrap();
    }
}

#[test]
fn cpu_pipeline_processes_a_directory_of_frames_end_to_end() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    write_test_frames(input_dir.path(), 6);

    let source = DirFrameSource::new(input_dir.path()).unwrap();
    let sink = DirFrameSink::new(output_dir.path());

    let config = SchedulerConfig {
        pipeline_depth: 2,
        thread_pool_size: 4,
        max_frames: Some(6),
        ..SchedulerConfig::default()
    };

    let scheduler: Scheduler<CpuWarp, CpuThreshold, CpuFindLanes> = Scheduler::new(
        config,
        || CpuWarp::default_for(32, 32),
        || CpuThreshold::new(false),
        CpuFindLanes::new,
        Box::new(source),
        Box::new(sink),
    );

    let report = scheduler.run().expect("pipeline run should succeed");
    assert_eq!(report.frames_processed, 6);
    assert_eq!(report.dropped_frames, 0);

    let written: Vec<_> = std::fs::read_dir(output_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(written.len(), 6);
}
