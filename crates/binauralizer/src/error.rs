use crate::hrir;

/// Errors surfaced by the engine and its control handle.
///
/// Per-block processing never returns these to the host; a failing block degrades to silence and
/// a diagnostic counter.  They are the synchronous answers of the control surface and of engine
/// construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The selected dataset slot has no loaded content.  The engine is muted until a valid slot
    /// is selected.
    #[error("No dataset is loaded in the selected slot")]
    NoActiveDataset,

    /// A large buffer could not be allocated.  The triggering operation was aborted; previously
    /// published state stays in effect.
    #[error("Buffer allocation failed during {0}")]
    AllocationFailed(&'static str),

    /// An FFT plan of the given size could not be built; the frequency-domain engine emits
    /// silence for blocks of that size.
    #[error("FFT plan of size {0} could not be built")]
    PlanAllocationFailed(usize),

    #[error("Dataset rejected: {0}")]
    Dataset(#[from] hrir::DatasetError),

    #[error("Resampling failed: {0}")]
    Resampling(#[from] hrir::ResamplingError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
