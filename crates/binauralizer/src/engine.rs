//! The engine façade: block processing, strategy dispatch, mute and degradation handling.
//!
//! Hosts hand in fixed-size interleaved blocks and get interleaved stereo back, synchronously.
//! Anything that goes wrong at block granularity degrades to silence plus a diagnostics counter;
//! it never takes the engine down.

use std::sync::Arc;

use crate::config::MAX_CHANNELS;
use crate::controller::{ControlHandle, Shared};
use crate::error::Result;
use crate::frequency_domain::FrequencyDomainEngine;
use crate::layout::ChannelLayout;
use crate::time_domain::TimeDomainEngine;

/// Which convolution strategy an engine runs.
///
/// Chosen once at construction; the inner loops never branch between modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum Strategy {
    /// Direct ring-buffer convolution, two worker threads computing one ear each.
    TimeDomain,
    /// Overlap-add block convolution, single-threaded per block.
    FrequencyDomain,
}

/// One interleaved block of input samples plus whatever per-block metadata the host carries.
///
/// The metadata is opaque to the engine and moves to the returned [StereoBlock] unmodified.
pub struct AudioBlock<'a, M> {
    pub samples: &'a [f32],
    pub meta: M,
}

/// The interleaved stereo result of processing one block.
pub struct StereoBlock<'a, M> {
    pub samples: &'a mut [f32],
    pub meta: M,
}

/// Non-fatal counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Output samples whose absolute value reached 1.0.
    pub clipped_samples: u64,
    /// Blocks that degraded to silence because of a runtime failure.
    pub degraded_blocks: u64,
    /// FFT plan rebuilds; stays 0 for time-domain engines.
    pub plan_rebuilds: u64,
}

enum EngineKind {
    Time(TimeDomainEngine),
    Frequency(FrequencyDomainEngine),
}

/// A binaural renderer for one input layout.
///
/// Construction returns the engine (owned by the processing side) and a clonable
/// [ControlHandle] for the configuration side; the two may live on different threads.
pub struct Binauralizer {
    shared: Arc<Shared>,
    layout: ChannelLayout,
    kind: EngineKind,
    clipped_samples: u64,
    degraded_blocks: u64,
}

impl Binauralizer {
    /// Open an engine for `layout` running at `sample_rate`, convolving with `strategy`.
    ///
    /// # Panics
    ///
    /// Panics if the layout's channel count is 0 or above [MAX_CHANNELS].
    pub fn new(
        layout: ChannelLayout,
        sample_rate: u32,
        strategy: Strategy,
    ) -> Result<(Binauralizer, ControlHandle)> {
        let channels = layout.input_channels();
        assert!(
            channels > 0 && channels <= MAX_CHANNELS,
            "unsupported channel count {channels}"
        );

        let shared = Shared::new(layout.clone(), sample_rate, strategy);
        let kind = match strategy {
            Strategy::TimeDomain => EngineKind::Time(TimeDomainEngine::new()?),
            Strategy::FrequencyDomain => EngineKind::Frequency(FrequencyDomainEngine::new()),
        };
        let handle = ControlHandle::new(shared.clone());

        Ok((
            Binauralizer {
                shared,
                layout,
                kind,
                clipped_samples: 0,
                degraded_blocks: 0,
            },
            handle,
        ))
    }

    /// Render one block.  Blocks until both output ears are ready.
    ///
    /// `output` must hold two samples per input frame; the input must be whole frames.  Both are
    /// programmer errors and panic.  A muted engine emits silence; a block that fails mid-flight
    /// also emits silence and bumps [Diagnostics::degraded_blocks].
    pub fn process<'a, M>(
        &mut self,
        input: AudioBlock<'_, M>,
        output: &'a mut [f32],
    ) -> StereoBlock<'a, M> {
        let channels = self.layout.input_channels();
        assert_eq!(
            input.samples.len() % channels,
            0,
            "input is not a whole number of frames"
        );
        let frames = input.samples.len() / channels;
        assert_eq!(output.len(), frames * 2, "output must hold 2 samples per frame");

        if frames == 0 || self.shared.is_muted() {
            output.fill(0.0);
            return StereoBlock {
                samples: output,
                meta: input.meta,
            };
        }

        let lfe = self.layout.lfe_index();
        let clipped = match &mut self.kind {
            EngineKind::Time(engine) => match self.shared.td_bank.load_full() {
                Some(bank) => Some(engine.process(&bank, input.samples, channels, lfe, output)),
                None => None,
            },
            EngineKind::Frequency(engine) => process_frequency(
                &self.shared,
                engine,
                input.samples,
                channels,
                lfe,
                output,
                frames,
            ),
        };

        match clipped {
            Some(clipped) => self.clipped_samples += clipped,
            None => {
                output.fill(0.0);
                self.degraded_blocks += 1;
            }
        }

        StereoBlock {
            samples: output,
            meta: input.meta,
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            clipped_samples: self.clipped_samples,
            degraded_blocks: self.degraded_blocks,
            plan_rebuilds: match &self.kind {
                EngineKind::Time(_) => 0,
                EngineKind::Frequency(engine) => engine.plan_rebuilds(),
            },
        }
    }
}

/// The frequency-domain per-block path, including the reconfiguration handshake.
///
/// Returns `None` when the block must degrade to silence.
fn process_frequency(
    shared: &Shared,
    engine: &mut FrequencyDomainEngine,
    samples: &[f32],
    channels: usize,
    lfe: Option<usize>,
    output: &mut [f32],
    frames: usize,
) -> Option<u64> {
    // A new block length obsoletes the plans, and the bank with them.
    if engine.block_len() != frames {
        match shared.reconfigure_fd(frames) {
            Ok(plans) => engine.install_plans(frames, plans),
            Err(e) => {
                log::warn!("Frequency-domain reconfiguration failed: {e}");
                return None;
            }
        }
    }

    let bank = shared.fd_bank.load_full()?;

    // A control-thread dataset switch may have grown the FFT; adopt the plans it built.
    if bank.fft_size != engine.fft_size() {
        let plans = shared.fd_plans()?;
        if plans.fft_size != bank.fft_size {
            log::warn!(
                "Published bank (fft {}) does not match the current plans (fft {})",
                bank.fft_size,
                plans.fft_size
            );
            return None;
        }
        engine.install_plans(frames, plans);
    }

    Some(engine.process(&bank, samples, channels, lfe, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close_floats::close_slices32;
    use crate::hrir::{RawDataset, RawMeasurement, ResampleQuality};

    fn measurement(
        azimuth: f32,
        ir_left: Vec<f32>,
        ir_right: Vec<f32>,
        delay_left: usize,
        delay_right: usize,
    ) -> RawMeasurement {
        RawMeasurement {
            azimuth,
            elevation: 0.0,
            radius: 1.0,
            delay_left,
            delay_right,
            ir_left,
            ir_right,
        }
    }

    /// Two measurements on the horizontal plane, distinct enough to tell apart in output.
    fn two_position_dataset() -> RawDataset {
        RawDataset {
            sample_rate: 48000,
            measurements: vec![
                measurement(
                    0.0,
                    vec![1.0, 0.5, -0.25, 0.125],
                    vec![0.8, 0.4, -0.2, 0.1],
                    0,
                    0,
                ),
                measurement(
                    90.0,
                    vec![0.3, 0.3, 0.3, 0.3],
                    vec![0.1, 0.1, 0.1, 0.1],
                    0,
                    0,
                ),
            ],
        }
    }

    fn stereo_dataset() -> RawDataset {
        RawDataset {
            sample_rate: 48000,
            measurements: vec![
                measurement(
                    30.0,
                    vec![0.9, -0.3, 0.2, 0.1],
                    vec![0.6, -0.2, 0.15, 0.05],
                    1,
                    2,
                ),
                measurement(
                    330.0,
                    vec![0.5, 0.4, -0.2, 0.05],
                    vec![0.45, 0.35, -0.15, 0.02],
                    0,
                    3,
                ),
            ],
        }
    }

    fn deinterleave(output: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let left = output.iter().copied().step_by(2).collect();
        let right = output.iter().copied().skip(1).step_by(2).collect();
        (left, right)
    }

    /// A deterministic, vaguely-audio-shaped test signal.
    fn signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (((i * 37 + 11) % 17) as f32) / 17.0 - 0.4)
            .collect()
    }

    #[test]
    fn impulse_through_a_mono_engine_reproduces_the_selected_pair() {
        let (mut engine, ctl) =
            Binauralizer::new(ChannelLayout::Mono, 48000, Strategy::TimeDomain).unwrap();
        ctl.load_dataset(0, two_position_dataset(), ResampleQuality::Fast)
            .unwrap();
        // One input channel: +3 dB cancels the per-channel attenuation, making the net gain 1.
        ctl.set_gain_db(3.0).unwrap();
        // Rotating to 10 degrees must resolve to the 0-degree measurement, not the 90-degree one.
        ctl.set_rotation(10.0).unwrap();

        let input = [1.0, 0.0, 0.0, 0.0];
        let mut output = [0.0f32; 8];
        engine.process(
            AudioBlock {
                samples: &input,
                meta: (),
            },
            &mut output,
        );

        let (left, right) = deinterleave(&output);
        close_slices32(&left, &[1.0, 0.5, -0.25, 0.125], 1e-5);
        close_slices32(&right, &[0.8, 0.4, -0.2, 0.1], 1e-5);
    }

    #[test]
    fn time_and_frequency_engines_agree() {
        let layout = ChannelLayout::Stereo21;
        let (mut td, td_ctl) =
            Binauralizer::new(layout.clone(), 48000, Strategy::TimeDomain).unwrap();
        let (mut fd, fd_ctl) =
            Binauralizer::new(layout.clone(), 48000, Strategy::FrequencyDomain).unwrap();

        for ctl in [&td_ctl, &fd_ctl] {
            ctl.load_dataset(0, stereo_dataset(), ResampleQuality::Fast)
                .unwrap();
            ctl.set_rotation(15.0).unwrap();
        }

        let frames = 8;
        let channels = layout.input_channels();
        for block in 0..4 {
            let input = signal((block + 1) * frames * channels)
                [block * frames * channels..]
                .to_vec();
            let mut td_out = vec![0.0f32; frames * 2];
            let mut fd_out = vec![0.0f32; frames * 2];
            td.process(
                AudioBlock {
                    samples: &input,
                    meta: (),
                },
                &mut td_out,
            );
            fd.process(
                AudioBlock {
                    samples: &input,
                    meta: (),
                },
                &mut fd_out,
            );
            close_slices32(&td_out, &fd_out, 1e-4);
        }
    }

    #[test]
    fn selecting_an_empty_slot_silences_the_next_block() {
        let (mut engine, ctl) =
            Binauralizer::new(ChannelLayout::Mono, 48000, Strategy::TimeDomain).unwrap();
        ctl.load_dataset(0, two_position_dataset(), ResampleQuality::Fast)
            .unwrap();

        let input = [0.5, 0.5, 0.5, 0.5];
        let mut output = [1.0f32; 8];
        engine.process(
            AudioBlock {
                samples: &input,
                meta: (),
            },
            &mut output,
        );
        assert!(output.iter().any(|s| *s != 0.0));

        assert!(ctl.select_dataset(2).is_err());
        assert!(ctl.is_muted());

        engine.process(
            AudioBlock {
                samples: &input,
                meta: (),
            },
            &mut output,
        );
        assert_eq!(output, [0.0f32; 8]);
    }

    #[test]
    fn growing_the_block_length_rebuilds_plans_and_bank_once() {
        let (mut engine, ctl) =
            Binauralizer::new(ChannelLayout::Mono, 48000, Strategy::FrequencyDomain).unwrap();
        ctl.load_dataset(0, two_position_dataset(), ResampleQuality::Fast)
            .unwrap();
        let banks_before = ctl.bank_rebuilds();

        let run = |engine: &mut Binauralizer, frames: usize| {
            let input = vec![0.1f32; frames];
            let mut output = vec![0.0f32; frames * 2];
            engine.process(
                AudioBlock {
                    samples: &input,
                    meta: (),
                },
                &mut output,
            );
        };

        run(&mut engine, 16);
        assert_eq!(engine.diagnostics().plan_rebuilds, 1);
        assert_eq!(ctl.bank_rebuilds(), banks_before + 1);

        run(&mut engine, 16);
        run(&mut engine, 16);
        assert_eq!(engine.diagnostics().plan_rebuilds, 1);
        assert_eq!(ctl.bank_rebuilds(), banks_before + 1);

        run(&mut engine, 32);
        assert_eq!(engine.diagnostics().plan_rebuilds, 2);
        assert_eq!(ctl.bank_rebuilds(), banks_before + 2);
    }

    #[test]
    fn clipping_is_counted_identically_in_both_engines() {
        for strategy in [Strategy::TimeDomain, Strategy::FrequencyDomain] {
            let (mut engine, ctl) =
                Binauralizer::new(ChannelLayout::Mono, 48000, strategy).unwrap();
            ctl.load_dataset(0, two_position_dataset(), ResampleQuality::Fast)
                .unwrap();
            // Hot gain so several output samples land at or above full scale.
            ctl.set_gain_db(15.0).unwrap();

            let input = signal(64);
            let mut output = vec![0.0f32; 128];
            engine.process(
                AudioBlock {
                    samples: &input,
                    meta: (),
                },
                &mut output,
            );

            let expected = output.iter().filter(|s| s.abs() >= 1.0).count() as u64;
            assert!(expected > 0, "test signal failed to clip under {strategy:?}");
            assert_eq!(engine.diagnostics().clipped_samples, expected);
        }
    }

    #[test]
    fn metadata_passes_through_unmodified() {
        let (mut engine, ctl) =
            Binauralizer::new(ChannelLayout::Mono, 48000, Strategy::TimeDomain).unwrap();
        ctl.load_dataset(0, two_position_dataset(), ResampleQuality::Fast)
            .unwrap();

        let input = [0.0f32; 4];
        let mut output = [0.0f32; 8];
        let result = engine.process(
            AudioBlock {
                samples: &input,
                meta: ("pts", 12345u64),
            },
            &mut output,
        );
        assert_eq!(result.meta, ("pts", 12345u64));
        assert_eq!(result.samples.len(), 8);
    }

    #[test]
    fn reconfiguration_races_do_not_tear_the_output() {
        let (mut engine, ctl) =
            Binauralizer::new(ChannelLayout::Stereo, 48000, Strategy::TimeDomain).unwrap();
        ctl.load_dataset(0, stereo_dataset(), ResampleQuality::Fast)
            .unwrap();

        let control = ctl.clone();
        let spinner = std::thread::spawn(move || {
            for i in 0..200 {
                control.set_rotation(i as f32 * 1.8).unwrap();
                control.set_gain_db((i % 12) as f32 - 6.0).unwrap();
            }
        });

        let input = signal(16 * 2);
        let mut output = vec![0.0f32; 32];
        for _ in 0..200 {
            engine.process(
                AudioBlock {
                    samples: &input,
                    meta: (),
                },
                &mut output,
            );
            assert!(output.iter().all(|s| s.is_finite()));
        }
        spinner.join().unwrap();
    }
}
