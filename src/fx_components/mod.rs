// src/fx_components/mod.rs

pub mod delay;
pub mod reverb;

pub use delay::DelayLine;
pub use reverb::Reverb;
