//! Sample-rate adaptation of a loaded dataset.
//!
//! Engines run at the host's rate, datasets ship at whatever rate they were measured at.  This
//! module converts every impulse response through rubato and rescales the broadband delays so the
//! delay duration in seconds is preserved.  The conversion is all-or-nothing: a failure on any
//! channel aborts the whole call and the partial result is dropped.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::dataset::measurement_from_parts;
use crate::{Dataset, Ear};

/// Reasons dataset resampling can fail.
#[derive(Debug, thiserror::Error)]
pub enum ResamplingError {
    #[error("Failed to create rubato resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("Failed to resample impulse response: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Quality presets for the sinc resampler.
///
/// Dataset conversion happens once per load, not per block, so `Best` is affordable; `Fast`
/// exists for tests and interactive dataset browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleQuality {
    Fast,
    Balanced,
    Best,
}

impl ResampleQuality {
    fn sinc_params(self) -> SincInterpolationParameters {
        match self {
            ResampleQuality::Fast => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 64,
                window: WindowFunction::Hann,
            },
            ResampleQuality::Balanced => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::Blackman,
            },
            ResampleQuality::Best => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
        }
    }
}

/// Convert `dataset` to `target_rate`.
///
/// A dataset already at the target rate is returned as a clone.  Otherwise every impulse response
/// (two per measurement) is converted independently to `ceil(ir_len * target/source)` samples and
/// every delay becomes `round(delay * target/source)`, keeping its duration in time.
pub fn resample_dataset(
    dataset: &Dataset,
    target_rate: u32,
    quality: ResampleQuality,
) -> Result<Dataset, ResamplingError> {
    if dataset.sample_rate() == target_rate {
        return Ok(dataset.clone());
    }

    let ratio = f64::from(target_rate) / f64::from(dataset.sample_rate());
    let out_len = (dataset.ir_len() as f64 * ratio).ceil() as usize;

    let mut measurements = Vec::with_capacity(dataset.len());
    for m in dataset.measurements() {
        let ir_left = resample_ir(m.ir(Ear::Left), ratio, out_len, quality.sinc_params())?;
        let ir_right = resample_ir(m.ir(Ear::Right), ratio, out_len, quality.sinc_params())?;
        measurements.push(measurement_from_parts(
            m.azimuth(),
            m.elevation(),
            m.radius(),
            scale_delay(m.delay(Ear::Left), ratio),
            scale_delay(m.delay(Ear::Right), ratio),
            ir_left,
            ir_right,
        ));
    }

    log::debug!(
        "Resampled dataset {} -> {} Hz, ir_len {} -> {}",
        dataset.sample_rate(),
        target_rate,
        dataset.ir_len(),
        out_len
    );

    Ok(Dataset::from_parts(target_rate, out_len, measurements))
}

fn scale_delay(delay: usize, ratio: f64) -> usize {
    (delay as f64 * ratio).round() as usize
}

/// Run one impulse response through a single-channel sinc resampler.
///
/// The resampler reports its own latency; that many leading frames are discarded so the converted
/// response starts where the original did.
fn resample_ir(
    ir: &[f32],
    ratio: f64,
    out_len: usize,
    params: SincInterpolationParameters,
) -> Result<Vec<f32>, ResamplingError> {
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, ir.len(), 1)?;
    let latency = resampler.output_delay();
    let needed = latency + out_len;

    let mut produced = Vec::with_capacity(needed);
    let first = resampler.process(&[ir], None)?;
    produced.extend_from_slice(&first[0]);

    // Flush the resampler's internal history until the tail of the response has come out.
    while produced.len() < needed {
        let flushed = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if flushed[0].is_empty() {
            break;
        }
        produced.extend_from_slice(&flushed[0]);
    }
    produced.resize(needed, 0.0);
    produced.drain(..latency);
    produced.truncate(out_len);

    Ok(produced)
}
