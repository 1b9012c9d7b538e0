//! Onset detection against rolling energy history.

use serde::Serialize;

use crate::error::{AnalysisError, Result};

/// Slope of the variance-to-sensitivity line; higher variance lowers sensitivity.
pub const SENSITIVITY_SLOPE: f32 = 0.0025714;
pub const SENSITIVITY_OFFSET: f32 = 1.5142857;

/// Fixed multiplier over a band's rolling average that counts as a beat.
pub const BAND_THRESHOLD: f32 = 1.4;

/// Fixed-length ring of energies, indexed most-recent-first.
#[derive(Clone, Debug, PartialEq)]
pub struct EnergyHistory {
    values: Vec<f32>,
    head: usize,
}

impl EnergyHistory {
    /// History of `len` zeroed entries. `len` is clamped to at least 1.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![0.0; len.max(1)],
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The `age`-th most recent entry; `get(0)` is the newest.
    pub fn get(&self, age: usize) -> Option<f32> {
        (age < self.values.len()).then(|| self.values[(self.head + age) % self.values.len()])
    }

    /// Insert `value` as the newest entry, evicting the oldest.
    pub fn push(&mut self, value: f32) {
        let len = self.values.len();
        self.head = (self.head + len - 1) % len;
        self.values[self.head] = value;
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let (older, newer) = self.values.split_at(self.head);
        newer.iter().chain(older.iter()).copied()
    }

    pub fn mean(&self) -> f32 {
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }
}

/// Detection values for one frame in simple mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SimpleStats {
    pub instant_energy: f32,
    /// Mean of the squared history entries
    pub rolling_average: f32,
    pub variance: f32,
    pub sensitivity: f32,
    pub fired: bool,
}

/// Beat predicate for simple mode. Pure in its inputs; does not touch the history.
pub fn simple_beat_stats(instant_energy: f32, history: &EnergyHistory) -> SimpleStats {
    let len = history.len() as f32;
    let rolling_average = history.iter().map(|e| e * e).sum::<f32>() / len;
    let variance = history
        .iter()
        .map(|e| {
            let deviation = e - rolling_average;
            deviation * deviation
        })
        .sum::<f32>()
        / len;
    let sensitivity = -SENSITIVITY_SLOPE * variance + SENSITIVITY_OFFSET;

    SimpleStats {
        instant_energy,
        rolling_average,
        variance,
        sensitivity,
        fired: instant_energy > rolling_average * sensitivity,
    }
}

/// Single-channel detector over total frame energy.
#[derive(Clone, Debug)]
pub struct SimpleDetector {
    history: EnergyHistory,
}

impl SimpleDetector {
    pub fn new(history_len: usize) -> Self {
        Self {
            history: EnergyHistory::new(history_len),
        }
    }

    pub fn history(&self) -> &EnergyHistory {
        &self.history
    }

    /// Evaluate one frame's energy, then record it.
    pub fn detect(&mut self, instant_energy: f32) -> SimpleStats {
        let stats = simple_beat_stats(instant_energy, &self.history);
        log::trace!(
            "simple: energy={:.4} avg={:.4} var={:.4} sens={:.4} fired={}",
            stats.instant_energy,
            stats.rolling_average,
            stats.variance,
            stats.sensitivity,
            stats.fired
        );
        self.history.push(instant_energy);
        stats
    }
}

/// Per-band detection result for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BandDetection {
    /// Indices of bands above threshold, ascending
    pub fired: Vec<usize>,
    /// Rolling average of each band before this frame was recorded
    pub averages: Vec<f32>,
}

/// One history per band with a fixed threshold over the plain mean.
#[derive(Clone, Debug)]
pub struct BandDetector {
    histories: Vec<EnergyHistory>,
}

impl BandDetector {
    pub fn new(band_count: usize, history_len: usize) -> Self {
        Self {
            histories: vec![EnergyHistory::new(history_len); band_count],
        }
    }

    pub fn band_count(&self) -> usize {
        self.histories.len()
    }

    pub fn history(&self, band: usize) -> Option<&EnergyHistory> {
        self.histories.get(band)
    }

    /// Compare each band to its rolling average, then record the frame.
    /// No history changes if `magnitudes` has the wrong length.
    pub fn detect(&mut self, magnitudes: &[f32]) -> Result<BandDetection> {
        if magnitudes.len() != self.histories.len() {
            return Err(AnalysisError::LengthMismatch {
                expected: self.histories.len(),
                actual: magnitudes.len(),
            });
        }

        let mut detection = BandDetection {
            fired: Vec::new(),
            averages: Vec::with_capacity(magnitudes.len()),
        };

        for (band, (history, &magnitude)) in
            self.histories.iter_mut().zip(magnitudes).enumerate()
        {
            let average = history.mean();
            if magnitude > average * BAND_THRESHOLD {
                detection.fired.push(band);
            }
            detection.averages.push(average);
            history.push(magnitude);
        }

        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_most_recent_first() {
        let mut history = EnergyHistory::new(4);
        for v in 1..=4 {
            history.push(v as f32);
        }
        assert_eq!(history.get(0), Some(4.0));
        assert_eq!(history.get(3), Some(1.0));
        assert_eq!(history.to_vec(), vec![4.0, 3.0, 2.0, 1.0]);

        history.push(5.0);
        assert_eq!(history.to_vec(), vec![5.0, 4.0, 3.0, 2.0]);
        assert_eq!(history.get(4), None);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn history_starts_zeroed() {
        let history = EnergyHistory::new(3);
        assert_eq!(history.to_vec(), vec![0.0; 3]);
        assert_eq!(history.mean(), 0.0);
        assert_eq!(EnergyHistory::new(0).len(), 1);
    }

    #[test]
    fn simple_average_is_mean_of_squares() {
        let mut history = EnergyHistory::new(2);
        history.push(2.0);
        history.push(4.0);
        let stats = simple_beat_stats(0.0, &history);
        assert!((stats.rolling_average - 10.0).abs() < 1e-6);
        // deviations: (4-10)^2 = 36, (2-10)^2 = 64
        assert!((stats.variance - 50.0).abs() < 1e-4);
        let expected = -SENSITIVITY_SLOPE * 50.0 + SENSITIVITY_OFFSET;
        assert!((stats.sensitivity - expected).abs() < 1e-6);
    }

    #[test]
    fn simple_predicate_is_deterministic() {
        let mut history = EnergyHistory::new(8);
        for v in [0.3, 0.1, 0.7, 0.2] {
            history.push(v);
        }
        let first = simple_beat_stats(0.9, &history);
        let second = simple_beat_stats(0.9, &history);
        assert_eq!(first, second);
    }

    #[test]
    fn silence_never_fires() {
        let mut detector = SimpleDetector::new(43);
        for _ in 0..100 {
            let stats = detector.detect(0.0);
            assert!(!stats.fired);
            assert_eq!(stats.variance, 0.0);
        }
    }

    #[test]
    fn simple_detector_fires_on_spike() {
        let mut detector = SimpleDetector::new(43);
        for _ in 0..50 {
            detector.detect(0.2);
        }
        assert!(detector.detect(2048.0).fired);
        assert_eq!(detector.history().get(0), Some(2048.0));
    }

    #[test]
    fn band_detector_uses_plain_mean() {
        let mut detector = BandDetector::new(2, 4);
        for _ in 0..4 {
            detector.detect(&[1.0, 1.0]).unwrap();
        }
        let detection = detector.detect(&[1.5, 1.3]).unwrap();
        assert_eq!(detection.fired, vec![0]);
        assert_eq!(detection.averages, vec![1.0, 1.0]);
        assert_eq!(detector.history(1).unwrap().get(0), Some(1.3));
    }

    #[test]
    fn band_detector_rejects_wrong_length_without_recording() {
        let mut detector = BandDetector::new(3, 4);
        detector.detect(&[1.0, 2.0, 3.0]).unwrap();
        let before: Vec<_> = (0..3).map(|b| detector.history(b).unwrap().clone()).collect();
        assert!(detector.detect(&[1.0, 2.0]).is_err());
        for (band, history) in before.iter().enumerate() {
            assert_eq!(detector.history(band).unwrap(), history);
        }
    }

    #[test]
    fn first_non_zero_band_frame_fires() {
        let mut detector = BandDetector::new(3, 10);
        let detection = detector.detect(&[0.0, 0.5, 0.0]).unwrap();
        assert_eq!(detection.fired, vec![1]);
    }
}
