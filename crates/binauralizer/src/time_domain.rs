//! Direct time-domain convolution against the active filter bank.
//!
//! Each ear owns a full arena of ring buffers (one ring per input channel) plus its own write
//! cursor, so the two ears can run concurrently without sharing mutable state: each pushes the
//! complete input block into its own rings and scans them against its ear's reversed impulse
//! responses.  Ring lengths are powers of two and all addressing goes through a mask.

use rayon::ThreadPool;

use crate::error::{Error, Result};
use crate::filter_bank::TimeDomainBank;

/// A per-ear arena of ring buffers, one boxed slice per input channel.
///
/// The arena persists across blocks; it is only reallocated (and zeroed) when a bank requires
/// more channels or a longer ring than currently allocated.  Lengths never shrink, so switching
/// back to a smaller dataset keeps the larger allocation.
struct RingArena {
    rings: Vec<Box<[f32]>>,
    mask: usize,
    cursor: usize,
}

impl RingArena {
    fn new() -> RingArena {
        RingArena {
            rings: Vec::new(),
            mask: 0,
            cursor: 0,
        }
    }

    fn ensure(&mut self, channels: usize, min_len: usize) {
        let current = self.rings.first().map(|r| r.len()).unwrap_or(0);
        if self.rings.len() == channels && current >= min_len {
            return;
        }

        let len = min_len.max(current).next_power_of_two();
        self.rings = (0..channels)
            .map(|_| vec![0.0f32; len].into_boxed_slice())
            .collect();
        self.mask = len - 1;
        self.cursor = 0;
    }

    fn len(&self) -> usize {
        self.mask + 1
    }
}

struct EarState {
    arena: RingArena,
    /// This ear's output for the current block; interleaved into the caller's buffer after the
    /// join.
    scratch: Vec<f32>,
}

pub(crate) struct TimeDomainEngine {
    /// Fixed two-worker pool; one worker per ear, joined every block.
    pool: ThreadPool,
    ears: [EarState; 2],
}

impl TimeDomainEngine {
    pub(crate) fn new() -> Result<TimeDomainEngine> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .thread_name(|i| format!("binauralizer-ear-{i}"))
            .build()
            .map_err(|_| Error::AllocationFailed("ear worker pool"))?;

        Ok(TimeDomainEngine {
            pool,
            ears: [
                EarState {
                    arena: RingArena::new(),
                    scratch: Vec::new(),
                },
                EarState {
                    arena: RingArena::new(),
                    scratch: Vec::new(),
                },
            ],
        })
    }

    /// Convolve one interleaved input block into interleaved stereo, returning how many output
    /// samples clipped.
    pub(crate) fn process(
        &mut self,
        bank: &TimeDomainBank,
        input: &[f32],
        input_channels: usize,
        lfe_index: Option<usize>,
        output: &mut [f32],
    ) -> u64 {
        let frames = input.len() / input_channels;
        assert_eq!(output.len(), frames * 2);

        for ear in &mut self.ears {
            ear.arena.ensure(input_channels, bank.ring_len);
            ear.scratch.resize(frames, 0.0);
        }

        let TimeDomainEngine { pool, ears } = self;
        let [left, right] = ears;
        let (clipped_left, clipped_right) = pool.install(|| {
            rayon::join(
                || {
                    process_ear(
                        0,
                        &mut left.arena,
                        &mut left.scratch,
                        bank,
                        input,
                        input_channels,
                        lfe_index,
                    )
                },
                || {
                    process_ear(
                        1,
                        &mut right.arena,
                        &mut right.scratch,
                        bank,
                        input,
                        input_channels,
                        lfe_index,
                    )
                },
            )
        });

        for i in 0..frames {
            output[2 * i] = left.scratch[i];
            output[2 * i + 1] = right.scratch[i];
        }

        clipped_left + clipped_right
    }
}

/// One ear's pass over the block: push every channel's sample, scan the rings against the
/// reversed impulses, mix the LFE, count clipping, advance the cursor.
fn process_ear(
    ear: usize,
    arena: &mut RingArena,
    scratch: &mut [f32],
    bank: &TimeDomainBank,
    input: &[f32],
    input_channels: usize,
    lfe_index: Option<usize>,
) -> u64 {
    let mask = arena.mask;
    let len = arena.len();
    let ir_len = bank.ir_len;
    let mut cursor = arena.cursor;
    let mut clipped = 0u64;

    for (i, out) in scratch.iter_mut().enumerate() {
        for (ch, ring) in arena.rings.iter_mut().enumerate() {
            ring[cursor] = input[i * input_channels + ch];
        }

        let mut sum = 0.0f32;
        for (ch, filter) in bank.channels.iter().enumerate() {
            let ring = &arena.rings[ch];
            let ir = &filter.ir_rev[ear];
            // The newest sample the filter reaches is `delay` samples back; the oldest is
            // `delay + ir_len - 1` back.  Scanning forward from there against the reversed
            // impulse realizes the convolution sum.
            let read_start = (cursor + len - filter.delay[ear] - (ir_len - 1)) & mask;
            let mut acc = 0.0f32;
            for (j, &h) in ir.iter().enumerate() {
                acc += ring[(read_start + j) & mask] * h;
            }
            sum += acc;
        }

        if let Some(lfe) = lfe_index {
            sum += arena.rings[lfe][cursor] * bank.lfe_gain;
        }

        if sum.abs() >= 1.0 {
            clipped += 1;
        }
        *out = sum;
        cursor = (cursor + 1) & mask;
    }

    arena.cursor = cursor;
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close_floats::close_slices32;
    use crate::controller::ControlState;
    use crate::filter_bank::build_time_domain_bank;
    use crate::hrir::{Dataset, RawDataset, RawMeasurement};
    use crate::layout::ChannelLayout;

    use proptest::prelude::*;

    fn mono_dataset(ir: Vec<f32>, delay: usize) -> Dataset {
        Dataset::from_raw(RawDataset {
            sample_rate: 48000,
            measurements: vec![RawMeasurement {
                azimuth: 0.0,
                elevation: 0.0,
                radius: 1.0,
                delay_left: delay,
                delay_right: delay,
                ir_left: ir.clone(),
                ir_right: ir,
            }],
        })
        .unwrap()
    }

    fn unity_state() -> ControlState {
        ControlState {
            // One input channel; 3 dB cancels the per-channel attenuation exactly.
            gain_db: 3.0,
            rotation: 0.0,
            elevation: 0.0,
            radius: 1.0,
            preset: 0,
            active_slot: 0,
            mute: false,
        }
    }

    fn deinterleave(output: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let left = output.iter().copied().step_by(2).collect();
        let right = output.iter().copied().skip(1).step_by(2).collect();
        (left, right)
    }

    #[test]
    fn unit_impulse_reproduces_the_impulse_response() {
        let ds = mono_dataset(vec![1.0, 2.0, 3.0, 4.0], 0);
        let bank = build_time_domain_bank(&ds, &ChannelLayout::Mono, &unity_state()).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        let input = [1.0, 0.0, 0.0, 0.0];
        let mut output = [0.0f32; 8];
        engine.process(&bank, &input, 1, None, &mut output);

        let (left, right) = deinterleave(&output);
        close_slices32(&left, &[1.0, 2.0, 3.0, 4.0], 1e-5);
        close_slices32(&right, &[1.0, 2.0, 3.0, 4.0], 1e-5);
    }

    #[test]
    fn convolution_continues_across_blocks() {
        let ds = mono_dataset(vec![1.0, 2.0, 3.0, 4.0], 0);
        let bank = build_time_domain_bank(&ds, &ChannelLayout::Mono, &unity_state()).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        // An impulse on the third sample of the first block: the response straddles the block
        // boundary.
        let mut output = [0.0f32; 8];
        engine.process(&bank, &[0.0, 0.0, 1.0, 0.0], 1, None, &mut output);
        let (left, _) = deinterleave(&output);
        close_slices32(&left, &[0.0, 0.0, 1.0, 2.0], 1e-5);

        engine.process(&bank, &[0.0, 0.0, 0.0, 0.0], 1, None, &mut output);
        let (left, _) = deinterleave(&output);
        close_slices32(&left, &[3.0, 4.0, 0.0, 0.0], 1e-5);
    }

    #[test]
    fn broadband_delay_shifts_the_response() {
        let raw = RawDataset {
            sample_rate: 48000,
            measurements: vec![RawMeasurement {
                azimuth: 0.0,
                elevation: 0.0,
                radius: 1.0,
                delay_left: 2,
                delay_right: 0,
                ir_left: vec![1.0, 2.0],
                ir_right: vec![1.0, 2.0],
            }],
        };
        let ds = Dataset::from_raw(raw).unwrap();
        let bank = build_time_domain_bank(&ds, &ChannelLayout::Mono, &unity_state()).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        let mut output = [0.0f32; 12];
        engine.process(&bank, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1, None, &mut output);

        let (left, right) = deinterleave(&output);
        close_slices32(&left, &[0.0, 0.0, 1.0, 2.0, 0.0, 0.0], 1e-5);
        close_slices32(&right, &[1.0, 2.0, 0.0, 0.0, 0.0, 0.0], 1e-5);
    }

    #[test]
    fn lfe_mixes_straight_through_both_ears() {
        // Stereo plus LFE; convolved channels get silence, the LFE carries a ramp.
        let ds = Dataset::from_raw(RawDataset {
            sample_rate: 48000,
            measurements: vec![RawMeasurement {
                azimuth: 30.0,
                elevation: 0.0,
                radius: 1.0,
                delay_left: 0,
                delay_right: 0,
                ir_left: vec![1.0, 0.0],
                ir_right: vec![1.0, 0.0],
            }],
        })
        .unwrap();
        let mut state = unity_state();
        state.gain_db = 0.0;
        let layout = ChannelLayout::Stereo21;
        let bank = build_time_domain_bank(&ds, &layout, &state).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        let input = [
            0.0, 0.0, 1.0, //
            0.0, 0.0, 2.0, //
            0.0, 0.0, 3.0,
        ];
        let mut output = [0.0f32; 6];
        engine.process(&bank, &input, 3, layout.lfe_index(), &mut output);

        let (left, right) = deinterleave(&output);
        let expected: Vec<f32> = [1.0, 2.0, 3.0].iter().map(|x| x * bank.lfe_gain).collect();
        close_slices32(&left, &expected, 1e-6);
        close_slices32(&right, &expected, 1e-6);
    }

    #[test]
    fn clipping_counts_once_per_hot_output_sample() {
        let ds = mono_dataset(vec![1.0], 0);
        let bank = build_time_domain_bank(&ds, &ChannelLayout::Mono, &unity_state()).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        let input = [2.0, 0.5, -1.0, 0.99];
        let mut output = [0.0f32; 8];
        let clipped = engine.process(&bank, &input, 1, None, &mut output);

        // 2.0 and -1.0 clip, on both ears.
        assert_eq!(clipped, 4);
    }

    proptest! {
        #[test]
        fn mask_addressing_matches_modulo(x in 0usize..usize::MAX / 2, pow in 0u32..20) {
            let len = 1usize << pow;
            prop_assert_eq!(x & (len - 1), x % len);
        }
    }

    /// An impulse on one channel of an n-channel layout must come through the convolution
    /// exactly once, whichever channel carries it.
    fn multichannel_routing(channels: usize, active: usize) {
        let ds = mono_dataset(vec![1.0, 2.0, 3.0, 4.0], 0);
        let layout = ChannelLayout::Raw {
            azimuths: vec![0.0; channels],
            lfe: false,
        };
        let mut state = unity_state();
        state.gain_db = 3.0 * channels as f32;
        let bank = build_time_domain_bank(&ds, &layout, &state).unwrap();
        let mut engine = TimeDomainEngine::new().unwrap();

        let mut input = vec![0.0f32; 4 * channels];
        input[active] = 1.0;
        let mut output = vec![0.0f32; 8];
        engine.process(&bank, &input, channels, None, &mut output);

        let (left, right) = deinterleave(&output);
        close_slices32(&left, &[1.0, 2.0, 3.0, 4.0], 1e-5);
        close_slices32(&right, &[1.0, 2.0, 3.0, 4.0], 1e-5);
    }

    macro_rules! routing_test {
        ($channels:literal, $active:literal) => {
            paste::paste! {
                #[test]
                fn [<routing_ $channels _ $active>]() {
                    multichannel_routing($channels, $active);
                }
            }
        };
    }

    routing_test!(2, 0);
    routing_test!(2, 1);
    routing_test!(5, 3);
    routing_test!(8, 7);
}
