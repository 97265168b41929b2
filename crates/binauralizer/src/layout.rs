//! Input channel layouts and their virtual loudspeaker positions.
//!
//! Each convolved input channel is rendered as a virtual loudspeaker at a fixed azimuth on a ring
//! around the listener; the low-frequency channel, when present, bypasses spatialization and is
//! mixed in directly.  The azimuth tables are configuration data.  Channel order is the convolved
//! channels in table order followed by the LFE as the final input channel.

/// A format for multichannel input audio.
#[derive(Clone, Debug, PartialEq, derive_more::IsVariant)]
pub enum ChannelLayout {
    /// A single channel rendered at the center position.
    Mono,
    /// Front left/right at +-30 degrees.
    Stereo,
    /// Stereo plus a low-frequency channel.
    Stereo21,
    Surround40,
    Surround41,
    Surround50,
    Surround51,
    Surround70,
    Surround71,
    Surround81,
    /// Any other arrangement: caller-supplied loudspeaker azimuths, optionally plus an LFE as the
    /// final channel.
    Raw { azimuths: Vec<f32>, lfe: bool },
}

const AZIMUTHS_MONO: &[f32] = &[0.0];
const AZIMUTHS_STEREO: &[f32] = &[30.0, 330.0];
const AZIMUTHS_4: &[f32] = &[30.0, 330.0, 120.0, 240.0];
// The fifth loudspeaker of 5.x material is the front center.
const AZIMUTHS_5: &[f32] = &[30.0, 330.0, 120.0, 240.0, 0.0];
const AZIMUTHS_7: &[f32] = &[30.0, 330.0, 90.0, 270.0, 150.0, 210.0, 0.0];
const AZIMUTHS_8: &[f32] = &[30.0, 330.0, 90.0, 270.0, 150.0, 210.0, 180.0, 0.0];

impl ChannelLayout {
    /// Loudspeaker azimuths in degrees, one per convolved channel.
    pub fn speaker_azimuths(&self) -> &[f32] {
        use ChannelLayout as L;
        match self {
            L::Mono => AZIMUTHS_MONO,
            L::Stereo | L::Stereo21 => AZIMUTHS_STEREO,
            L::Surround40 | L::Surround41 => AZIMUTHS_4,
            L::Surround50 | L::Surround51 => AZIMUTHS_5,
            L::Surround70 | L::Surround71 => AZIMUTHS_7,
            L::Surround81 => AZIMUTHS_8,
            L::Raw { azimuths, .. } => azimuths,
        }
    }

    /// Whether the final input channel is a low-frequency channel.
    pub fn has_lfe(&self) -> bool {
        use ChannelLayout as L;
        matches!(
            self,
            L::Stereo21 | L::Surround41 | L::Surround51 | L::Surround71 | L::Surround81
        ) || matches!(self, L::Raw { lfe: true, .. })
    }

    /// Number of channels that get convolved, excluding the LFE.
    pub fn convolved_channels(&self) -> usize {
        self.speaker_azimuths().len()
    }

    /// Total input channel count, LFE included.
    pub fn input_channels(&self) -> usize {
        self.convolved_channels() + usize::from(self.has_lfe())
    }

    /// Index of the LFE within an input frame, when present.
    pub fn lfe_index(&self) -> Option<usize> {
        self.has_lfe().then(|| self.convolved_channels())
    }
}
