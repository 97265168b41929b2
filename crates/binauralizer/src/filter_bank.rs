//! Building the per-channel filter set the convolution engines read.
//!
//! A rebuild runs on the control thread whenever a parameter or the active dataset changes.  It
//! resolves a measured position for every convolved channel, bakes the master gain into the
//! impulse data, and hands back a complete bank; publishing the bank (an atomic pointer swap) is
//! the controller's job, so a concurrently running convolution pass keeps reading the previous
//! snapshot and never observes a mix of old and new filters.

use realfft::num_complex::Complex;
use realfft::RealToComplex;
use smallvec::SmallVec;

use crate::config::{MAX_CHANNELS, PRESET_POSITIONS};
use crate::controller::ControlState;
use crate::db::DbExt;
use crate::error::{Error, Result};
use crate::hrir::{nearest, Dataset, Ear};
use crate::layout::ChannelLayout;

/// One convolved channel's filters for the time-domain engine.
///
/// The impulse responses are stored reversed and pre-scaled so the engine's forward scan of the
/// ring buffer is a plain accumulating dot product.
pub(crate) struct TdChannelFilter {
    pub ir_rev: [Box<[f32]>; 2],
    pub delay: [usize; 2],
}

/// Per-channel filter storage; inline up to the layout maximum.
pub(crate) type ChannelFilters<T> = SmallVec<[T; MAX_CHANNELS]>;

pub(crate) struct TimeDomainBank {
    /// One entry per convolved channel; the LFE has no entry.
    pub channels: ChannelFilters<TdChannelFilter>,
    pub ir_len: usize,
    /// Power-of-two ring length covering `ir_len` plus the dataset's largest delay.
    pub ring_len: usize,
    pub lfe_gain: f32,
}

/// One convolved channel's HRTF spectrum pair, sized to the current FFT.
pub(crate) struct FdChannelFilter {
    pub spectrum: [Box<[Complex<f32>]>; 2],
}

pub(crate) struct FrequencyDomainBank {
    pub channels: ChannelFilters<FdChannelFilter>,
    pub fft_size: usize,
    /// Longest time-domain extent of any filter: impulse length plus the largest delay.  The
    /// overlap-add drain count derives from this.
    pub longest_filter: usize,
    pub lfe_gain: f32,
}

/// Master linear gain: the control gain lowered by 3 dB per input channel.
pub(crate) fn master_gain(gain_db: f32, input_channels: usize) -> f32 {
    (gain_db - 3.0 * input_channels as f32).db_to_gain()
}

/// LFE linear gain: 6 dB below the master gain.
pub(crate) fn lfe_gain(gain_db: f32, input_channels: usize) -> f32 {
    (gain_db - 3.0 * input_channels as f32 - 6.0).db_to_gain()
}

/// The position channel `speaker_azimuth` should be rendered at under `state`.
///
/// Preset 0 follows the live rotation and elevation; other presets collapse every channel onto
/// one fixed source position.
fn channel_position(state: &ControlState, speaker_azimuth: f32) -> (f32, f32) {
    match state.preset {
        0 => (
            (speaker_azimuth + state.rotation).rem_euclid(360.0),
            state.elevation,
        ),
        p => PRESET_POSITIONS[p - 1],
    }
}

fn reversed_scaled(ir: &[f32], gain: f32) -> Result<Box<[f32]>> {
    let mut out = Vec::new();
    out.try_reserve_exact(ir.len())
        .map_err(|_| Error::AllocationFailed("time-domain filter bank"))?;
    out.extend(ir.iter().rev().map(|s| s * gain));
    Ok(out.into_boxed_slice())
}

pub(crate) fn build_time_domain_bank(
    dataset: &Dataset,
    layout: &ChannelLayout,
    state: &ControlState,
) -> Result<TimeDomainBank> {
    let input_channels = layout.input_channels();
    let master = master_gain(state.gain_db, input_channels);

    let mut channels = ChannelFilters::new();
    channels
        .try_reserve_exact(layout.convolved_channels())
        .map_err(|_| Error::AllocationFailed("time-domain filter bank"))?;

    for &speaker_azimuth in layout.speaker_azimuths() {
        let (azimuth, elevation) = channel_position(state, speaker_azimuth);
        let m = &dataset.measurements()[nearest(dataset, azimuth, elevation, state.radius)];
        channels.push(TdChannelFilter {
            ir_rev: [
                reversed_scaled(m.ir(Ear::Left), master)?,
                reversed_scaled(m.ir(Ear::Right), master)?,
            ],
            delay: [m.delay(Ear::Left), m.delay(Ear::Right)],
        });
    }

    Ok(TimeDomainBank {
        channels,
        ir_len: dataset.ir_len(),
        ring_len: (dataset.ir_len() + dataset.max_delay()).next_power_of_two(),
        lfe_gain: lfe_gain(state.gain_db, input_channels),
    })
}

pub(crate) fn build_frequency_domain_bank(
    dataset: &Dataset,
    layout: &ChannelLayout,
    state: &ControlState,
    fft_size: usize,
    forward: &dyn RealToComplex<f32>,
) -> Result<FrequencyDomainBank> {
    let input_channels = layout.input_channels();
    let master = master_gain(state.gain_db, input_channels);
    let longest_filter = dataset.ir_len() + dataset.max_delay();
    // The engine sizes the FFT to the longest filter plus the block length before asking for a
    // bank, so every delay-shifted impulse fits.
    assert!(
        fft_size >= longest_filter,
        "FFT size {} cannot hold filters of length {}",
        fft_size,
        longest_filter
    );

    let bins = fft_size / 2 + 1;
    let mut padded = vec![0.0f32; fft_size];

    let mut channels = ChannelFilters::new();
    channels
        .try_reserve_exact(layout.convolved_channels())
        .map_err(|_| Error::AllocationFailed("frequency-domain filter bank"))?;

    for &speaker_azimuth in layout.speaker_azimuths() {
        let (azimuth, elevation) = channel_position(state, speaker_azimuth);
        let m = &dataset.measurements()[nearest(dataset, azimuth, elevation, state.radius)];

        let mut spectra: Vec<Box<[Complex<f32>]>> = Vec::with_capacity(2);
        for ear in Ear::BOTH {
            padded.fill(0.0);
            let delay = m.delay(ear);
            for (j, s) in m.ir(ear).iter().enumerate() {
                padded[delay + j] = s * master;
            }

            let mut spectrum = Vec::new();
            spectrum
                .try_reserve_exact(bins)
                .map_err(|_| Error::AllocationFailed("frequency-domain filter bank"))?;
            spectrum.resize(bins, Complex::new(0.0, 0.0));
            forward
                .process(&mut padded, &mut spectrum)
                .expect("FFT buffers are sized for the plan");
            spectra.push(spectrum.into_boxed_slice());
        }

        let right = spectra.pop().expect("two spectra were just pushed");
        let left = spectra.pop().expect("two spectra were just pushed");
        channels.push(FdChannelFilter {
            spectrum: [left, right],
        });
    }

    Ok(FrequencyDomainBank {
        channels,
        fft_size,
        longest_filter,
        lfe_gain: lfe_gain(state.gain_db, input_channels),
    })
}
