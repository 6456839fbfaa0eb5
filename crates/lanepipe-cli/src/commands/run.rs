use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use lanepipe_core::{EmitOrder, Scheduler, SchedulerConfig, SchedulerError, SchedulerMsg};
use lanepipe_stages::{CpuFindLanes, CpuThreshold, CpuWarp, DirFrameSink, DirFrameSource};

#[derive(Args)]
pub struct RunArgs {
    /// Directory of input frame images, processed in filename order
    pub input: PathBuf,

    /// Directory annotated frames are written to
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Pipeline config file (TOML); CLI flags below override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads in the pool
    #[arg(long, default_value = "8")]
    pub threads: usize,

    /// In-flight frames per stage
    #[arg(long, default_value = "3")]
    pub depth: usize,

    /// Stop after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Fan Threshold sub-steps out within a wave instead of running them one at a time
    #[arg(long)]
    pub parallel: bool,

    /// Drop late frames instead of holding the sink for strict order
    #[arg(long)]
    pub skip_late: bool,

    /// Artificial per-frame delay at the FindLanes -> Sink boundary, in microseconds
    #[arg(long, default_value = "0")]
    pub delay_us: u64,
}

pub fn run(args: &RunArgs, verbose: bool) -> Result<()> {
    let config = if let Some(ref path) = args.config {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).context("invalid pipeline config")?
    } else {
        build_config_from_args(args, verbose)
    };

    println!("lanepipe");
    println!("  Input:     {}", args.input.display());
    println!("  Output:    {}", args.output.display());
    println!("  Threads:   {}", config.thread_pool_size);
    println!("  Depth:     {}", config.pipeline_depth);
    println!("  Emit:      {:?}", config.emit_order);
    println!();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.set_message("running pipeline...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let source = DirFrameSource::new(&args.input)
        .with_context(|| format!("failed to open input directory {}", args.input.display()))?;
    let sink = DirFrameSink::new(args.output.clone());
    let parallel = config.parallel_mode;
    let (width, height) = first_frame_dimensions(&args.input).unwrap_or((640, 480));

    let scheduler: Scheduler<CpuWarp, CpuThreshold, CpuFindLanes> = Scheduler::new(
        config,
        move || CpuWarp::default_for(width, height),
        move || CpuThreshold::new(parallel),
        CpuFindLanes::new,
        Box::new(source),
        Box::new(sink),
    );

    let stop_tx = scheduler.sender();
    ctrlc::set_handler(move || {
        info!("ctrl-c received, stopping pipeline");
        let _ = stop_tx.send(SchedulerMsg::Stop);
    })
    .context("failed to install ctrl-c handler")?;

    let report = match scheduler.run() {
        Ok(report) => report,
        Err(SchedulerError::PoolExhausted) => {
            pb.finish_with_message("worker pool exhausted");
            info!("worker pool exhausted, all workers lost");
            std::process::exit(2);
        }
        Err(err) => return Err(err).context("pipeline run failed"),
    };
    pb.finish_with_message("done");

    println!("Frames processed: {}", report.frames_processed);
    println!("Frames dropped:   {}", report.dropped_frames);
    println!("Workers lost:     {}", report.lost_workers);

    if !report.durations.is_empty() {
        println!();
        println!("Average sub-step durations:");
        for (name, avg) in &report.durations {
            println!("  {name:<16} {avg:?}");
        }
    }

    if report.drain_timed_out {
        info!("drain timed out waiting for in-flight frames");
    }
    Ok(())
}

fn first_frame_dimensions(dir: &std::path::Path) -> Option<(usize, usize)> {
    let mut entries: Vec<_> = std::fs::read_dir(dir).ok()?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        if let Ok((w, h)) = image::image_dimensions(entry.path()) {
            return Some((w as usize, h as usize));
        }
    }
    None
}

fn build_config_from_args(args: &RunArgs, verbose: bool) -> SchedulerConfig {
    SchedulerConfig {
        video_file: args.input.display().to_string(),
        thread_pool_size: args.threads,
        pipeline_depth: args.depth,
        max_frames: args.max_frames,
        delay_us: args.delay_us,
        parallel_mode: args.parallel,
        gpu_accel: false,
        verbose,
        emit_order: if args.skip_late {
            EmitOrder::SkipLate
        } else {
            EmitOrder::Strict
        },
        ..SchedulerConfig::default()
    }
}
