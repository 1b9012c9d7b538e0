//! Beat reactions restricted to a frequency range.

use serde::{Deserialize, Serialize};

use super::bands::SpectrumPartitioner;
use super::features::BeatEvent;
use crate::error::{AnalysisError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Lower edge in Hz; defaults to 0
    #[serde(default)]
    pub min_hz: Option<f32>,
    /// Upper edge in Hz; defaults to Nyquist
    #[serde(default)]
    pub max_hz: Option<f32>,
    /// Reactions at or below this intensity are dropped
    #[serde(default)]
    pub min_intensity: f32,
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            min_hz: None,
            max_hz: None,
            min_intensity: 0.0,
            multiplier: default_multiplier(),
        }
    }
}

fn default_multiplier() -> f32 { 1.1 }

impl ReactorConfig {
    pub fn is_enabled(&self) -> bool {
        self.min_hz.is_some() || self.max_hz.is_some()
    }
}

/// Turns beat events into a single scaled intensity for bands inside a range.
#[derive(Clone, Debug, PartialEq)]
pub struct BeatReactor {
    min_band: usize,
    max_band: usize,
    min_intensity: f32,
    multiplier: f32,
}

impl BeatReactor {
    /// Resolve the frequency range to bands once, up front.
    pub fn new(config: &ReactorConfig, partitioner: &SpectrumPartitioner) -> Result<Self> {
        let min_hz = config.min_hz.unwrap_or(0.0);
        let max_hz = config.max_hz.unwrap_or_else(|| partitioner.nyquist());
        if min_hz > max_hz {
            return Err(AnalysisError::config(
                "reactor",
                format!("min_hz {} is above max_hz {}", min_hz, max_hz),
            ));
        }

        let reactor = Self {
            min_band: containing_band(partitioner, min_hz)?,
            max_band: containing_band(partitioner, max_hz)?,
            min_intensity: config.min_intensity,
            multiplier: config.multiplier,
        };
        log::debug!(
            "Reactor: {}-{} Hz -> bands {}..={}",
            min_hz,
            max_hz,
            reactor.min_band,
            reactor.max_band
        );
        Ok(reactor)
    }

    pub fn band_range(&self) -> (usize, usize) {
        (self.min_band, self.max_band)
    }

    /// Scaled intensity of the fired bands in range, if it clears the minimum.
    pub fn react(&self, beat: &BeatEvent) -> Option<f32> {
        let intensity =
            beat.intensity_where(|band| band >= self.min_band && band <= self.max_band);
        (intensity > self.min_intensity).then_some(intensity * self.multiplier)
    }
}

/// Band whose bins hold `frequency`: the one before the first band starting
/// above it, or the last band when none does.
fn containing_band(partitioner: &SpectrumPartitioner, frequency: f32) -> Result<usize> {
    match partitioner.band_for_frequency(frequency) {
        Ok(next) => Ok(next.saturating_sub(1)),
        Err(AnalysisError::NoBandForFrequency { .. }) => {
            Ok(partitioner.band_count().saturating_sub(1))
        }
        Err(err) => Err(err),
    }
}
