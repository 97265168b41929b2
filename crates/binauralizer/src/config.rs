/// The most input channels any supported layout carries, LFE included.
///
/// 8.1 material is the largest layout in the wild that maps onto a ring of virtual loudspeakers;
/// sizing per-channel scratch to this constant keeps those arrays on the stack via smallvec.
pub const MAX_CHANNELS: usize = 10;

/// How many datasets may be resident at once for instant comparison.
///
/// Exactly one of these slots is active at a time.
pub const DATASET_SLOTS: usize = 3;

/// Fixed virtual source positions selectable through the preset switch, as (azimuth, elevation)
/// in degrees.
///
/// Preset index 0 means "no preset": every channel keeps its loudspeaker azimuth plus the live
/// rotation.  Indices 1 through `PRESET_POSITIONS.len()` collapse all convolved channels onto the
/// corresponding entry here.  This table is configuration data, not part of the convolution
/// contract.
pub const PRESET_POSITIONS: [(f32, f32); 4] = [(0.0, 0.0), (90.0, 0.0), (180.0, 0.0), (270.0, 0.0)];
