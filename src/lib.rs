//! Real-time spectral band analysis and adaptive beat detection.
//!
//! Stereo frames are transformed with an in-place radix-2 FFT (left channel as
//! the real part, right as the imaginary part), partitioned into linear or
//! logarithmic bands, and compared against about one second of rolling energy
//! history to flag onsets. [`audio::pipeline::SamplePipeline::step`] runs one
//! frame end to end.

pub mod audio;
pub mod config;
pub mod error;

pub use audio::bands::{BandMode, SpectrumPartitioner};
pub use audio::features::{BandSet, BeatEvent, SampleFrame};
pub use audio::pipeline::{Event, EventBus, PipelineConfig, SamplePipeline, StepOutcome};
pub use error::{AnalysisError, Result};
