//! In-memory model of one loaded HRTF dataset.
//!
//! Container parsing lives upstream; by the time data reaches this module it has already been read
//! off disk and normalized into [RawDataset].  This module's job is to check the structural
//! invariants the rest of the engine relies on (one impulse response length, one sample rate) and
//! to produce the immutable [Dataset] everything else consumes.

/// One measurement as delivered by the dataset reader.
///
/// The reader is responsible for expanding shared delay pairs into one pair per measurement, so
/// this type always carries its own delays.
#[derive(Debug, Clone)]
pub struct RawMeasurement {
    /// Azimuth in degrees, 0 to 360, proceeding clockwise.
    pub azimuth: f32,
    /// Elevation in degrees where -90 is straight down and 90 straight up.
    pub elevation: f32,
    /// Distance of the measurement from the listener, in meters.
    pub radius: f32,
    /// Broadband delay of the left ear, in samples.
    pub delay_left: usize,
    /// Broadband delay of the right ear, in samples.
    pub delay_right: usize,
    pub ir_left: Vec<f32>,
    pub ir_right: Vec<f32>,
}

/// The already-parsed contents of one dataset container, not yet validated.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub sample_rate: u32,
    pub measurements: Vec<RawMeasurement>,
}

/// Reasons a [RawDataset] cannot become a [Dataset].
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset is structurally invalid: {0}")]
    InvalidFormat(&'static str),

    #[error("Dataset is missing required data: {0}")]
    MissingField(&'static str),
}

/// One measured position with its impulse response pair and broadband delay pair.
///
/// Immutable once the owning [Dataset] is built.
#[derive(Debug, Clone)]
pub struct Measurement {
    azimuth: f32,
    elevation: f32,
    radius: f32,
    delay_left: usize,
    delay_right: usize,
    ir_left: Vec<f32>,
    ir_right: Vec<f32>,
}

impl Measurement {
    pub fn azimuth(&self) -> f32 {
        self.azimuth
    }

    pub fn elevation(&self) -> f32 {
        self.elevation
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// The broadband delay for the given ear, in samples at the dataset's rate.
    pub fn delay(&self, ear: Ear) -> usize {
        match ear {
            Ear::Left => self.delay_left,
            Ear::Right => self.delay_right,
        }
    }

    pub fn ir(&self, ear: Ear) -> &[f32] {
        match ear {
            Ear::Left => &self.ir_left,
            Ear::Right => &self.ir_right,
        }
    }
}

/// Which ear an impulse response or delay belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];
}

/// An ordered collection of measurements sharing one sample rate and one impulse response length.
///
/// Built only through [Dataset::from_raw], which either returns a complete dataset or an error;
/// a half-initialized dataset is never observable.
#[derive(Debug, Clone)]
pub struct Dataset {
    sample_rate: u32,
    ir_len: usize,
    measurements: Vec<Measurement>,
}

impl Dataset {
    /// Validate `raw` and take ownership of its contents.
    pub fn from_raw(raw: RawDataset) -> Result<Dataset, DatasetError> {
        if raw.measurements.is_empty() {
            return Err(DatasetError::MissingField("measurements"));
        }

        if raw.sample_rate == 0 {
            return Err(DatasetError::InvalidFormat("sample rate is zero"));
        }

        let ir_len = raw.measurements[0].ir_left.len();
        if ir_len == 0 {
            return Err(DatasetError::MissingField("impulse responses"));
        }

        for m in &raw.measurements {
            if m.ir_left.len() != ir_len || m.ir_right.len() != ir_len {
                return Err(DatasetError::InvalidFormat(
                    "impulse response lengths are not uniform",
                ));
            }
        }

        let measurements = raw
            .measurements
            .into_iter()
            .map(|m| Measurement {
                azimuth: m.azimuth,
                elevation: m.elevation,
                radius: m.radius,
                delay_left: m.delay_left,
                delay_right: m.delay_right,
                ir_left: m.ir_left,
                ir_right: m.ir_right,
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Accepted dataset: {} measurements, ir_len={}, rate={}",
            measurements.len(),
            ir_len,
            raw.sample_rate
        );

        Ok(Dataset {
            sample_rate: raw.sample_rate,
            ir_len,
            measurements,
        })
    }

    /// Assemble a dataset whose invariants were already established by this crate.
    ///
    /// Callers must guarantee uniform impulse response lengths; this is checked in debug builds
    /// only.
    pub(crate) fn from_parts(
        sample_rate: u32,
        ir_len: usize,
        measurements: Vec<Measurement>,
    ) -> Dataset {
        debug_assert!(measurements
            .iter()
            .all(|m| m.ir_left.len() == ir_len && m.ir_right.len() == ir_len));
        Dataset {
            sample_rate,
            ir_len,
            measurements,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The shared length of every impulse response in this dataset.
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// The largest broadband delay across all measurements and both ears.
    pub fn max_delay(&self) -> usize {
        self.measurements
            .iter()
            .map(|m| m.delay_left.max(m.delay_right))
            .max()
            .unwrap_or(0)
    }
}

pub(crate) fn measurement_from_parts(
    azimuth: f32,
    elevation: f32,
    radius: f32,
    delay_left: usize,
    delay_right: usize,
    ir_left: Vec<f32>,
    ir_right: Vec<f32>,
) -> Measurement {
    Measurement {
        azimuth,
        elevation,
        radius,
        delay_left,
        delay_right,
        ir_left,
        ir_right,
    }
}
