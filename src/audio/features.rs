use serde::Serialize;

use crate::error::{AnalysisError, Result};

/// One window of stereo samples, both channels the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleFrame {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl SampleFrame {
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> Result<Self> {
        if left.len() != right.len() {
            return Err(AnalysisError::LengthMismatch {
                expected: left.len(),
                actual: right.len(),
            });
        }
        Ok(Self { left, right })
    }

    /// Frame with both channels held at a constant value.
    pub fn constant(len: usize, value: f32) -> Self {
        Self {
            left: vec![value; len],
            right: vec![value; len],
        }
    }

    pub fn silent(len: usize) -> Self {
        Self::constant(len, 0.0)
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Sum of squared samples over both channels.
    pub fn energy(&self) -> f32 {
        self.left
            .iter()
            .zip(self.right.iter())
            .map(|(l, r)| l * l + r * r)
            .sum()
    }
}

/// A contiguous group of spectrum bins reduced to one value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Band {
    /// First bin of the band
    pub start_bin: usize,
    /// Nominal bin count; the last band may run past the spectrum and sum fewer bins
    pub width: usize,
    /// Aggregated magnitude (mean for linear, weighted sum for logarithmic)
    pub magnitude: f32,
    /// Start frequency in Hz
    pub start_hz: Option<f32>,
}

/// Ordered bands for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BandSet {
    pub bands: Vec<Band>,
}

impl BandSet {
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn magnitudes(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.magnitude).collect()
    }

    pub fn widths(&self) -> Vec<usize> {
        self.bands.iter().map(|b| b.width).collect()
    }

    pub fn start_frequencies(&self) -> Vec<Option<f32>> {
        self.bands.iter().map(|b| b.start_hz).collect()
    }
}

/// Onset event: indices that fired plus the full magnitude vector they index into.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BeatEvent {
    pub bands: Vec<usize>,
    pub magnitudes: Vec<f32>,
}

impl BeatEvent {
    /// Sum of magnitudes for the fired bands accepted by `keep`.
    pub fn intensity_where(&self, mut keep: impl FnMut(usize) -> bool) -> f32 {
        self.bands
            .iter()
            .copied()
            .filter(|&b| keep(b))
            .filter_map(|b| self.magnitudes.get(b))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_requires_equal_channels() {
        assert!(SampleFrame::new(vec![0.0; 4], vec![0.0; 3]).is_err());
        assert_eq!(SampleFrame::new(vec![0.0; 4], vec![0.0; 4]).unwrap().len(), 4);
    }

    #[test]
    fn frame_energy_sums_both_channels() {
        let frame = SampleFrame::new(vec![1.0, 2.0], vec![0.5, -1.0]).unwrap();
        assert!((frame.energy() - 6.25).abs() < 1e-6);
    }

    #[test]
    fn beat_intensity_filters_bands() {
        let beat = BeatEvent {
            bands: vec![0, 2, 3],
            magnitudes: vec![1.0, 10.0, 2.0, 4.0],
        };
        assert!((beat.intensity_where(|b| b >= 2) - 6.0).abs() < 1e-6);
        assert_eq!(beat.intensity_where(|_| false), 0.0);
    }
}
