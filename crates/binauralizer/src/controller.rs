//! Mutable control state and the rebuild-on-change path.
//!
//! Every tunable lives behind one mutex.  A setter normalizes its input, updates the state, and
//! synchronously rebuilds the filter bank for the active dataset; the finished bank is published
//! through an atomic pointer swap, so the audio thread never waits on a rebuild — it keeps
//! convolving against the previous snapshot until the swap lands.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use realfft::RealFftPlanner;

use crate::config::{DATASET_SLOTS, PRESET_POSITIONS};
use crate::engine::Strategy;
use crate::error::{Error, Result};
use crate::filter_bank::{
    build_frequency_domain_bank, build_time_domain_bank, FrequencyDomainBank, TimeDomainBank,
};
use crate::frequency_domain::{fft_size_for, FftPlans};
use crate::hrir::{resample_dataset, Dataset, RawDataset, ResampleQuality};
use crate::layout::ChannelLayout;

/// The live tunables.
pub(crate) struct ControlState {
    pub gain_db: f32,
    /// Degrees, kept normalized to [0, 360).
    pub rotation: f32,
    /// Degrees, kept within [-90, 90].
    pub elevation: f32,
    /// Meters, kept non-negative.
    pub radius: f32,
    /// 0 = live rotation/elevation; 1..=PRESET_POSITIONS.len() = a fixed source position.
    pub preset: usize,
    /// Which dataset slot feeds the filter bank.  Slots are zero-indexed.
    pub active_slot: usize,
    /// Derived: set when the active slot has no usable dataset.  Not directly settable.
    pub mute: bool,
}

impl ControlState {
    fn new() -> ControlState {
        ControlState {
            gain_db: 0.0,
            rotation: 0.0,
            elevation: 0.0,
            radius: 1.0,
            preset: 0,
            active_slot: 0,
            // Nothing is loaded yet.
            mute: true,
        }
    }
}

/// Everything under the control mutex.
pub(crate) struct Critical {
    pub state: ControlState,
    pub slots: [Option<Arc<Dataset>>; DATASET_SLOTS],
    pub layout: ChannelLayout,
    pub engine_rate: u32,
    pub strategy: Strategy,
    /// Present once a block length is known (frequency-domain mode only).
    pub fd_plans: Option<FftPlans>,
    pub fd_block_len: usize,
}

/// State shared between the control surface and the processing side.
pub(crate) struct Shared {
    pub(crate) critical: Mutex<Critical>,

    /// Published banks, loaded lock-free by the audio thread.  Only the bank matching the
    /// engine's strategy is ever populated.
    pub(crate) td_bank: ArcSwapOption<TimeDomainBank>,
    pub(crate) fd_bank: ArcSwapOption<FrequencyDomainBank>,

    /// Mirror of [ControlState::mute], readable without the lock.
    pub(crate) muted: AtomicBool,

    /// How many filter banks have been published; diagnostics.
    pub(crate) bank_rebuilds: AtomicU64,
}

impl Shared {
    pub(crate) fn new(layout: ChannelLayout, engine_rate: u32, strategy: Strategy) -> Arc<Shared> {
        Arc::new(Shared {
            critical: Mutex::new(Critical {
                state: ControlState::new(),
                slots: Default::default(),
                layout,
                engine_rate,
                strategy,
                fd_plans: None,
                fd_block_len: 0,
            }),
            td_bank: ArcSwapOption::empty(),
            fd_bank: ArcSwapOption::empty(),
            muted: AtomicBool::new(true),
            bank_rebuilds: AtomicU64::new(0),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Critical> {
        self.critical.lock().unwrap()
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn set_mute(&self, crit: &mut Critical, mute: bool) {
        crit.state.mute = mute;
        self.muted.store(mute, Ordering::Relaxed);
    }

    /// Rebuild and publish the filter bank for the active dataset.
    ///
    /// On `NoActiveDataset` the engine mutes and the previous bank stays published; on
    /// allocation failure the previous bank also stays published and the mute state is left
    /// alone.
    pub(crate) fn rebuild_locked(&self, crit: &mut Critical) -> Result<()> {
        let dataset = match crit.slots[crit.state.active_slot].clone() {
            Some(ds) => ds,
            None => {
                self.set_mute(crit, true);
                return Err(Error::NoActiveDataset);
            }
        };

        match crit.strategy {
            Strategy::TimeDomain => {
                let bank = build_time_domain_bank(&dataset, &crit.layout, &crit.state)?;
                self.td_bank.store(Some(Arc::new(bank)));
                self.bank_rebuilds.fetch_add(1, Ordering::Relaxed);
            }
            Strategy::FrequencyDomain => {
                // Until the first block tells us the block length there is nothing to size the
                // FFT with; the first process() call will configure and land here again.
                if crit.fd_block_len != 0 {
                    let longest = dataset.ir_len() + dataset.max_delay();
                    let fft_size = fft_size_for(longest, crit.fd_block_len);
                    let plans_stale = crit
                        .fd_plans
                        .as_ref()
                        .map(|p| p.fft_size != fft_size)
                        .unwrap_or(true);
                    if plans_stale {
                        crit.fd_plans = Some(build_plans(fft_size)?);
                    }
                    let plans = crit.fd_plans.as_ref().expect("plans were just ensured");
                    let bank = build_frequency_domain_bank(
                        &dataset,
                        &crit.layout,
                        &crit.state,
                        plans.fft_size,
                        plans.forward.as_ref(),
                    )?;
                    self.fd_bank.store(Some(Arc::new(bank)));
                    self.bank_rebuilds.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.set_mute(crit, false);
        Ok(())
    }

    /// The processing side noticed a new block length: rebuild plans and bank for it.
    ///
    /// Always rebuilds, even when the resulting FFT size happens to match, so a block-length
    /// change costs exactly one plan rebuild and one bank rebuild.
    pub(crate) fn reconfigure_fd(&self, block_len: usize) -> Result<FftPlans> {
        let mut crit = self.lock();
        crit.fd_block_len = block_len;

        let dataset = match crit.slots[crit.state.active_slot].clone() {
            Some(ds) => ds,
            None => {
                self.set_mute(&mut crit, true);
                return Err(Error::NoActiveDataset);
            }
        };

        let longest = dataset.ir_len() + dataset.max_delay();
        let plans = build_plans(fft_size_for(longest, block_len))?;
        crit.fd_plans = Some(plans.clone());

        let bank = build_frequency_domain_bank(
            &dataset,
            &crit.layout,
            &crit.state,
            plans.fft_size,
            plans.forward.as_ref(),
        )?;
        self.fd_bank.store(Some(Arc::new(bank)));
        self.bank_rebuilds.fetch_add(1, Ordering::Relaxed);
        self.set_mute(&mut crit, false);

        Ok(plans)
    }

    /// Clone of the current plan pair, for the processing side to adopt after a control-thread
    /// rebuild changed the FFT size.
    pub(crate) fn fd_plans(&self) -> Option<FftPlans> {
        self.lock().fd_plans.clone()
    }
}

fn build_plans(fft_size: usize) -> Result<FftPlans> {
    if fft_size == 0 {
        return Err(Error::PlanAllocationFailed(0));
    }
    let mut planner = RealFftPlanner::<f32>::new();
    Ok(FftPlans {
        fft_size,
        forward: planner.plan_fft_forward(fft_size),
        inverse: planner.plan_fft_inverse(fft_size),
    })
}

/// The control surface of one engine instance.
///
/// Clonable and sendable; setters may be called from any thread while the engine processes
/// blocks.  Every setter applies its change and rebuilds the filter bank before returning.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> ControlHandle {
        ControlHandle { shared }
    }

    /// Master gain in dB.  The per-channel and LFE attenuations are applied on top of this.
    pub fn set_gain_db(&self, gain_db: f32) -> Result<()> {
        let mut crit = self.shared.lock();
        crit.state.gain_db = gain_db;
        self.shared.rebuild_locked(&mut crit)
    }

    /// Head rotation in degrees; any real number, normalized into [0, 360).
    pub fn set_rotation(&self, degrees: f32) -> Result<()> {
        let mut crit = self.shared.lock();
        crit.state.rotation = degrees.rem_euclid(360.0);
        self.shared.rebuild_locked(&mut crit)
    }

    /// Elevation in degrees, clamped to [-90, 90].
    pub fn set_elevation(&self, degrees: f32) -> Result<()> {
        let mut crit = self.shared.lock();
        crit.state.elevation = degrees.clamp(-90.0, 90.0);
        self.shared.rebuild_locked(&mut crit)
    }

    /// Distance of the virtual loudspeakers in meters, clamped to be non-negative.
    pub fn set_radius(&self, meters: f32) -> Result<()> {
        let mut crit = self.shared.lock();
        crit.state.radius = meters.max(0.0);
        self.shared.rebuild_locked(&mut crit)
    }

    /// Select a source-position preset; 0 returns to live rotation/elevation control.
    ///
    /// # Panics
    ///
    /// Panics if `preset` exceeds the preset table.
    pub fn select_preset(&self, preset: usize) -> Result<()> {
        assert!(
            preset <= PRESET_POSITIONS.len(),
            "preset {} out of range (0..={})",
            preset,
            PRESET_POSITIONS.len()
        );
        let mut crit = self.shared.lock();
        crit.state.preset = preset;
        self.shared.rebuild_locked(&mut crit)
    }

    /// Make `slot` the active dataset.
    ///
    /// Selecting a slot with no loaded content mutes the engine and returns
    /// [Error::NoActiveDataset]; the previously published bank stays in place (it is unreachable
    /// while muted).
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [DATASET_SLOTS].
    pub fn select_dataset(&self, slot: usize) -> Result<()> {
        assert!(slot < DATASET_SLOTS, "dataset slot {slot} out of range");
        let mut crit = self.shared.lock();
        crit.state.active_slot = slot;
        self.shared.rebuild_locked(&mut crit)
    }

    /// Validate `raw`, convert it to the engine rate, and store it in `slot`.
    ///
    /// A rejected or unconvertible dataset leaves the slot and the running engine untouched.
    /// Loading into the active slot rebuilds the bank (and unmutes) immediately.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [DATASET_SLOTS].
    pub fn load_dataset(
        &self,
        slot: usize,
        raw: RawDataset,
        quality: ResampleQuality,
    ) -> Result<()> {
        assert!(slot < DATASET_SLOTS, "dataset slot {slot} out of range");

        let dataset = match Dataset::from_raw(raw) {
            Ok(ds) => ds,
            Err(e) => {
                log::warn!("Rejecting dataset for slot {slot}: {e}");
                return Err(e.into());
            }
        };

        let mut crit = self.shared.lock();
        let resampled = match resample_dataset(&dataset, crit.engine_rate, quality) {
            Ok(ds) => ds,
            Err(e) => {
                log::warn!("Resampling dataset for slot {slot} failed: {e}");
                return Err(e.into());
            }
        };

        log::info!(
            "Loaded dataset into slot {slot}: {} measurements, ir_len={}, rate={}",
            resampled.len(),
            resampled.ir_len(),
            resampled.sample_rate()
        );
        crit.slots[slot] = Some(Arc::new(resampled));

        if crit.state.active_slot == slot {
            self.shared.rebuild_locked(&mut crit)?;
        }
        Ok(())
    }

    /// Drop the dataset in `slot`.  Unloading the active slot mutes the engine.
    pub fn unload_dataset(&self, slot: usize) {
        assert!(slot < DATASET_SLOTS, "dataset slot {slot} out of range");
        let mut crit = self.shared.lock();
        crit.slots[slot] = None;
        if crit.state.active_slot == slot {
            // Expected to fail with NoActiveDataset; that is the point.
            if let Err(e) = self.shared.rebuild_locked(&mut crit) {
                log::info!("Unloaded the active dataset: {e}");
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.shared.is_muted()
    }

    pub fn gain_db(&self) -> f32 {
        self.shared.lock().state.gain_db
    }

    pub fn rotation(&self) -> f32 {
        self.shared.lock().state.rotation
    }

    pub fn elevation(&self) -> f32 {
        self.shared.lock().state.elevation
    }

    pub fn radius(&self) -> f32 {
        self.shared.lock().state.radius
    }

    pub fn preset(&self) -> usize {
        self.shared.lock().state.preset
    }

    pub fn active_dataset(&self) -> usize {
        self.shared.lock().state.active_slot
    }

    /// How many filter banks have been published over this engine's lifetime.
    pub fn bank_rebuilds(&self) -> u64 {
        self.shared.bank_rebuilds.load(Ordering::Relaxed)
    }
}
