/// Fixed linear succession: Warp -> Threshold -> FindLanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Warp,
    Threshold,
    FindLanes,
}

impl StageKind {
    /// The stage that receives this stage's output, if any.
    pub fn downstream(self) -> Option<StageKind> {
        match self {
            StageKind::Warp => Some(StageKind::Threshold),
            StageKind::Threshold => Some(StageKind::FindLanes),
            StageKind::FindLanes => None,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Warp => write!(f, "Warp"),
            StageKind::Threshold => write!(f, "Threshold"),
            StageKind::FindLanes => write!(f, "FindLanes"),
        }
    }
}
