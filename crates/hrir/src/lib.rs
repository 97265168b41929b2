mod dataset;
mod position;
mod resampling;

pub use dataset::*;
pub use position::nearest;
pub use resampling::*;
