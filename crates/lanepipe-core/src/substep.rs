/// `&'static str` identity for a sub-step, independent of `Display`. Used to
/// correlate a `CompleteStep` message (which only carries a name) back to
/// the entry it came from without re-allocating a `String` per dispatch.
pub trait SubStepName: Copy {
    fn name(self) -> &'static str;
}

/// Warp has a single sub-step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WarpStep {
    RunWarp,
}

impl SubStepName for WarpStep {
    fn name(self) -> &'static str {
        "RunWarp"
    }
}

impl std::fmt::Display for WarpStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Threshold's catalog. Which waves are produced by `advance_wave` depends
/// on whether the instance is running in sequential or parallel mode (see
/// `crate::instance::ThresholdMode`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreshStep {
    SplitBgr,
    ThreshRed,
    SplitHls,
    ThreshSat,
    SobelX,
    ThreshSobelX,
    CombineThresh,
}

impl SubStepName for ThreshStep {
    fn name(self) -> &'static str {
        match self {
            ThreshStep::SplitBgr => "SplitBGR",
            ThreshStep::ThreshRed => "ThreshRed",
            ThreshStep::SplitHls => "SplitHLS",
            ThreshStep::ThreshSat => "ThreshSat",
            ThreshStep::SobelX => "SobelX",
            ThreshStep::ThreshSobelX => "ThreshSobelX",
            ThreshStep::CombineThresh => "CombineThresh",
        }
    }
}

impl std::fmt::Display for ThreshStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// FindLanes is a spec-level black box: one atomic sub-step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FindLanesStep {
    Run,
}

impl SubStepName for FindLanesStep {
    fn name(self) -> &'static str {
        "Run"
    }
}

impl std::fmt::Display for FindLanesStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
