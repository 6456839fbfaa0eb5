/// Which concrete implementation a run is paired with. The pairing is fixed
/// for the whole scheduler at construction (`lanepipe_core::Scheduler` is
/// generic over the three stage types) — this enum exists for config/CLI
/// plumbing, not for runtime dispatch inside the scheduler itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

#[cfg(feature = "gpu")]
pub mod gpu {
    //! `wgpu` device bootstrap for the `gpu` backend. The compute kernels
    //! themselves are not yet ported to WGSL; the Gpu* stage types below
    //! delegate to the CPU kernels while holding a live `GpuContext` so the
    //! device/queue plumbing is exercised end to end. Porting `SplitBgr`/
    //! `SobelX`/the warp resample loop to compute shaders is future work.

    use lanepipe_core::{
        FindLanesInstance, FindLanesOutput, FindLanesStep, Frame, LaneHistory, Result,
        StageInstance, StepList, ThreshStep, ThresholdInstance, ThresholdOutput, WarpInstance,
        WarpOutput, WarpStep,
    };

    use crate::findlanes::CpuFindLanes;
    use crate::threshold::CpuThreshold;
    use crate::warp::CpuWarp;

    pub struct GpuContext {
        pub device: wgpu::Device,
        pub queue: wgpu::Queue,
    }

    impl GpuContext {
        pub fn acquire() -> Result<Self> {
            pollster::block_on(Self::acquire_async())
        }

        async fn acquire_async() -> Result<Self> {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .map_err(|e| {
                    lanepipe_core::SchedulerError::SourceFailure(format!("no gpu adapter: {e}"))
                })?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .map_err(|e| {
                    lanepipe_core::SchedulerError::SourceFailure(format!("gpu device request failed: {e}"))
                })?;
            Ok(Self { device, queue })
        }
    }

    pub struct GpuWarp {
        inner: CpuWarp,
        _ctx: std::sync::Arc<GpuContext>,
    }

    impl GpuWarp {
        pub fn new(ctx: std::sync::Arc<GpuContext>, inner: CpuWarp) -> Self {
            Self { inner, _ctx: ctx }
        }
    }

    impl StageInstance for GpuWarp {
        type SubStep = WarpStep;
        type Input = Frame;
        type Output = WarpOutput;

        fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps(f)
        }
        fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps_mut(f)
        }
        fn is_bound(&self) -> bool {
            self.inner.is_bound()
        }
        fn bind(&self, input: Self::Input) {
            self.inner.bind(input)
        }
        fn execute(&self, step: Self::SubStep) -> Result<()> {
            self.inner.execute(step)
        }
        fn advance_wave(&self) {
            self.inner.advance_wave()
        }
        fn output(&self) -> Self::Output {
            self.inner.output()
        }
        fn release(&self) {
            self.inner.release()
        }
    }

    impl WarpInstance for GpuWarp {}

    pub struct GpuThreshold {
        inner: CpuThreshold,
        _ctx: std::sync::Arc<GpuContext>,
    }

    impl GpuThreshold {
        pub fn new(ctx: std::sync::Arc<GpuContext>, inner: CpuThreshold) -> Self {
            Self { inner, _ctx: ctx }
        }
    }

    impl StageInstance for GpuThreshold {
        type SubStep = ThreshStep;
        type Input = WarpOutput;
        type Output = ThresholdOutput;

        fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps(f)
        }
        fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps_mut(f)
        }
        fn is_bound(&self) -> bool {
            self.inner.is_bound()
        }
        fn bind(&self, input: Self::Input) {
            self.inner.bind(input)
        }
        fn execute(&self, step: Self::SubStep) -> Result<()> {
            self.inner.execute(step)
        }
        fn advance_wave(&self) {
            self.inner.advance_wave()
        }
        fn output(&self) -> Self::Output {
            self.inner.output()
        }
        fn release(&self) {
            self.inner.release()
        }
    }

    impl ThresholdInstance for GpuThreshold {
        fn parallel_mode(&self) -> bool {
            self.inner.parallel_mode()
        }
    }

    pub struct GpuFindLanes {
        inner: CpuFindLanes,
        _ctx: std::sync::Arc<GpuContext>,
    }

    impl GpuFindLanes {
        pub fn new(ctx: std::sync::Arc<GpuContext>, inner: CpuFindLanes) -> Self {
            Self { inner, _ctx: ctx }
        }
    }

    impl StageInstance for GpuFindLanes {
        type SubStep = FindLanesStep;
        type Input = ThresholdOutput;
        type Output = FindLanesOutput;

        fn with_steps<R>(&self, f: impl FnOnce(&StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps(f)
        }
        fn with_steps_mut<R>(&self, f: impl FnOnce(&mut StepList<Self::SubStep>) -> R) -> R {
            self.inner.with_steps_mut(f)
        }
        fn is_bound(&self) -> bool {
            self.inner.is_bound()
        }
        fn bind(&self, input: Self::Input) {
            self.inner.bind(input)
        }
        fn execute(&self, step: Self::SubStep) -> Result<()> {
            self.inner.execute(step)
        }
        fn advance_wave(&self) {
            self.inner.advance_wave()
        }
        fn output(&self) -> Self::Output {
            self.inner.output()
        }
        fn release(&self) {
            self.inner.release()
        }
    }

    impl FindLanesInstance for GpuFindLanes {
        fn set_lane_history(&self, history: LaneHistory) {
            self.inner.set_lane_history(history)
        }
    }
}
