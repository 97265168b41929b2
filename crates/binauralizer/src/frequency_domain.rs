//! Block convolution by overlap-add in the frequency domain.
//!
//! The FFT is sized to the longest filter plus the host's block length, so plans (and the filter
//! bank, whose spectra are sized to the FFT) must be rebuilt whenever the block length changes.
//! Per block each convolved channel is forward-transformed once and multiply-accumulated into a
//! per-ear spectrum; one inverse transform per ear then yields `block_len` fresh output samples
//! plus a tail that is summed into a persistent per-ear overflow ring for later blocks.
//!
//! Both ears are computed on the calling thread; unlike the time-domain engine there is no
//! per-ear worker split here.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealToComplex};

use crate::filter_bank::FrequencyDomainBank;

/// A per-ear overflow ring holding the not-yet-emitted convolution tails.
struct OverflowRing {
    data: Box<[f32]>,
    mask: usize,
    cursor: usize,
}

impl OverflowRing {
    fn empty() -> OverflowRing {
        OverflowRing {
            data: Box::new([]),
            mask: 0,
            cursor: 0,
        }
    }

    fn reset(&mut self, len: usize) {
        debug_assert!(len.is_power_of_two());
        self.data = vec![0.0f32; len].into_boxed_slice();
        self.mask = len - 1;
        self.cursor = 0;
    }
}

/// The forward/inverse plan pair for one FFT size.
#[derive(Clone)]
pub(crate) struct FftPlans {
    pub fft_size: usize,
    pub forward: Arc<dyn RealToComplex<f32>>,
    pub inverse: Arc<dyn ComplexToReal<f32>>,
}

pub(crate) struct FrequencyDomainEngine {
    /// The block length the current plans were built for; 0 until the first block arrives.
    block_len: usize,
    plans: Option<FftPlans>,
    overflow: [OverflowRing; 2],

    // Scratch, sized to the FFT on plan install so the per-block path does not allocate.
    padded: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    acc: [Vec<Complex<f32>>; 2],
    time_out: Vec<f32>,
    fft_scratch: Vec<Complex<f32>>,

    plan_rebuilds: u64,
}

impl FrequencyDomainEngine {
    pub(crate) fn new() -> FrequencyDomainEngine {
        FrequencyDomainEngine {
            block_len: 0,
            plans: None,
            overflow: [OverflowRing::empty(), OverflowRing::empty()],
            padded: Vec::new(),
            spectrum: Vec::new(),
            acc: [Vec::new(), Vec::new()],
            time_out: Vec::new(),
            fft_scratch: Vec::new(),
            plan_rebuilds: 0,
        }
    }

    /// The FFT size the engine is currently configured for, 0 when unconfigured.
    pub(crate) fn fft_size(&self) -> usize {
        self.plans.as_ref().map(|p| p.fft_size).unwrap_or(0)
    }

    pub(crate) fn block_len(&self) -> usize {
        self.block_len
    }

    pub(crate) fn plan_rebuilds(&self) -> u64 {
        self.plan_rebuilds
    }

    /// Adopt new plans for `block_len`-sized blocks.  The overflow rings restart empty: tails
    /// computed under the old FFT size are not meaningful under the new one.
    pub(crate) fn install_plans(&mut self, block_len: usize, plans: FftPlans) {
        let fft_size = plans.fft_size;
        let bins = fft_size / 2 + 1;

        self.padded.clear();
        self.padded.resize(fft_size, 0.0);
        self.spectrum.clear();
        self.spectrum.resize(bins, Complex::new(0.0, 0.0));
        for acc in &mut self.acc {
            acc.clear();
            acc.resize(bins, Complex::new(0.0, 0.0));
        }
        self.time_out.clear();
        self.time_out.resize(fft_size, 0.0);
        let scratch = plans
            .forward
            .get_scratch_len()
            .max(plans.inverse.get_scratch_len());
        self.fft_scratch.clear();
        self.fft_scratch.resize(scratch, Complex::new(0.0, 0.0));
        for ring in &mut self.overflow {
            ring.reset(fft_size);
        }

        self.block_len = block_len;
        self.plans = Some(plans);
        self.plan_rebuilds += 1;
        log::debug!("Installed FFT plans: fft_size={fft_size}, block_len={block_len}");
    }

    /// Convolve one block, returning the number of clipped output samples.
    ///
    /// `install_plans` must have run for this block length, and `bank` must be sized to the same
    /// FFT; both are enforced as programmer errors.
    pub(crate) fn process(
        &mut self,
        bank: &FrequencyDomainBank,
        input: &[f32],
        input_channels: usize,
        lfe_index: Option<usize>,
        output: &mut [f32],
    ) -> u64 {
        let frames = input.len() / input_channels;
        assert_eq!(output.len(), frames * 2);
        assert_eq!(frames, self.block_len);
        let plans = self.plans.as_ref().expect("plans are installed");
        let fft_size = plans.fft_size;
        assert_eq!(bank.fft_size, fft_size);

        let scale = 1.0 / fft_size as f32;

        for acc in &mut self.acc {
            acc.fill(Complex::new(0.0, 0.0));
        }

        // Transform each channel once, multiply-accumulate into both ears.
        for (ch, filter) in bank.channels.iter().enumerate() {
            self.padded.fill(0.0);
            for i in 0..frames {
                self.padded[i] = input[i * input_channels + ch];
            }
            plans
                .forward
                .process_with_scratch(&mut self.padded, &mut self.spectrum, &mut self.fft_scratch)
                .expect("FFT buffers are sized for the plan");

            for (acc, ear_spectrum) in self.acc.iter_mut().zip(filter.spectrum.iter()) {
                for ((a, s), h) in acc.iter_mut().zip(&self.spectrum).zip(ear_spectrum.iter()) {
                    *a += s * h;
                }
            }
        }

        // Only the first `longest_filter - 1` samples past a block boundary can hold tail
        // energy; nothing beyond that is ever nonzero.
        let drain = (bank.longest_filter - 1).min(frames);
        let mut clipped = 0u64;

        for (ear, (acc, ring)) in self
            .acc
            .iter_mut()
            .zip(self.overflow.iter_mut())
            .enumerate()
        {
            // Accumulated float error can leave a residue on the purely-real bins; the inverse
            // transform rejects a nonzero imaginary part there.
            let last = acc.len() - 1;
            acc[0].im = 0.0;
            acc[last].im = 0.0;
            plans
                .inverse
                .process_with_scratch(acc, &mut self.time_out, &mut self.fft_scratch)
                .expect("FFT buffers are sized for the plan");

            for i in 0..frames {
                let mut sample = self.time_out[i] * scale;
                if i < drain {
                    let idx = (ring.cursor + i) & ring.mask;
                    sample += ring.data[idx];
                    ring.data[idx] = 0.0;
                }
                if let Some(lfe) = lfe_index {
                    sample += input[i * input_channels + lfe] * bank.lfe_gain;
                }
                if sample.abs() >= 1.0 {
                    clipped += 1;
                }
                output[2 * i + ear] = sample;
            }

            // Sum this block's tail into the ring; tails of successive blocks overlap.
            for j in frames..fft_size {
                let idx = (ring.cursor + j) & ring.mask;
                ring.data[idx] += self.time_out[j] * scale;
            }
            ring.cursor = (ring.cursor + frames) & ring.mask;
        }

        clipped
    }
}

/// The FFT size covering `longest_filter`-sample impulses convolved with `block_len`-sample
/// blocks.
pub(crate) fn fft_size_for(longest_filter: usize, block_len: usize) -> usize {
    (longest_filter + block_len).next_power_of_two()
}
