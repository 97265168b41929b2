#[cfg(test)]
mod close_floats;
mod config;
mod controller;
mod db;
mod engine;
mod error;
mod filter_bank;
mod frequency_domain;
mod layout;
mod time_domain;

pub use binauralizer_hrir as hrir;

pub use config::{DATASET_SLOTS, MAX_CHANNELS, PRESET_POSITIONS};
pub use controller::ControlHandle;
pub use db::DbExt;
pub use engine::{AudioBlock, Binauralizer, Diagnostics, StereoBlock, Strategy};
pub use error::{Error, Result};
pub use layout::ChannelLayout;
