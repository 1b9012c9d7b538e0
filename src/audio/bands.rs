//! Spectrum partitioning into bands.
//!
//! The layout (start bin and width of every band) depends only on the
//! configuration, so it is computed once at construction and reused for every
//! frame.

use serde::{Deserialize, Serialize};

use super::features::{Band, BandSet};
use crate::error::{AnalysisError, Result};

/// How the spectrum is split into bands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BandMode {
    /// No transform; one aggregate from time-domain energy
    Simple,
    /// Equal-width bands, each the mean of its bins
    Linear,
    /// Widths growing linearly with band index
    #[default]
    #[serde(alias = "dynamic")]
    #[value(alias = "dynamic")]
    Logarithmic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BandRange {
    start: usize,
    width: usize,
}

#[derive(Clone, Debug)]
pub struct SpectrumPartitioner {
    mode: BandMode,
    spectrum_len: usize,
    sample_rate: f32,
    frame_duration: f32,
    layout: Vec<BandRange>,
}

impl SpectrumPartitioner {
    /// Partitioner for the `frame_size / 2 + 1` bins produced by a frame of `frame_size` samples.
    pub fn new(
        mode: BandMode,
        band_count: usize,
        first_band_width: usize,
        frame_size: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if frame_size < 2 {
            return Err(AnalysisError::config(
                "frame_size",
                format!("{} is too small to produce a spectrum", frame_size),
            ));
        }
        Self::build(
            mode,
            band_count,
            first_band_width,
            frame_size / 2 + 1,
            frame_size,
            sample_rate,
        )
    }

    /// Partitioner over an arbitrary spectrum length, as if produced by a `2 * (len - 1)` frame.
    pub fn from_spectrum_len(
        mode: BandMode,
        band_count: usize,
        first_band_width: usize,
        spectrum_len: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if spectrum_len < 2 {
            return Err(AnalysisError::config(
                "spectrum_len",
                format!("{} bins is too small to partition", spectrum_len),
            ));
        }
        Self::build(
            mode,
            band_count,
            first_band_width,
            spectrum_len,
            2 * (spectrum_len - 1),
            sample_rate,
        )
    }

    fn build(
        mode: BandMode,
        band_count: usize,
        first_band_width: usize,
        spectrum_len: usize,
        frame_size: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AnalysisError::config("sample_rate", "must be positive"));
        }

        let widths = match mode {
            BandMode::Simple => vec![spectrum_len],
            BandMode::Linear => {
                check_band_count(band_count, spectrum_len)?;
                vec![linear_width(spectrum_len, band_count); band_count]
            }
            BandMode::Logarithmic => {
                check_band_count(band_count, spectrum_len)?;
                if first_band_width == 0 {
                    return Err(AnalysisError::config("first_band_width", "must be at least 1"));
                }
                logarithmic_widths(spectrum_len, band_count, first_band_width)?
            }
        };

        let mut layout = Vec::with_capacity(widths.len());
        let mut offset = 0;
        for width in widths {
            layout.push(BandRange { start: offset, width });
            offset += width;
        }

        let sample_rate = sample_rate as f32;
        Ok(Self {
            mode,
            spectrum_len,
            sample_rate,
            frame_duration: frame_size as f32 / sample_rate,
            layout,
        })
    }

    pub fn mode(&self) -> BandMode {
        self.mode
    }

    pub fn band_count(&self) -> usize {
        self.layout.len()
    }

    pub fn spectrum_len(&self) -> usize {
        self.spectrum_len
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }

    pub fn widths(&self) -> Vec<usize> {
        self.layout.iter().map(|r| r.width).collect()
    }

    pub fn band_start_frequencies(&self) -> Vec<f32> {
        self.layout
            .iter()
            .map(|r| r.start as f32 / self.frame_duration)
            .collect()
    }

    /// Reduce a magnitude spectrum to one value per band.
    pub fn partition(&self, spectrum: &[f32]) -> Result<BandSet> {
        if spectrum.len() != self.spectrum_len {
            return Err(AnalysisError::LengthMismatch {
                expected: self.spectrum_len,
                actual: spectrum.len(),
            });
        }

        let bands = self
            .layout
            .iter()
            .map(|range| {
                let end = (range.start + range.width).min(self.spectrum_len);
                let bins = spectrum.get(range.start..end).unwrap_or(&[]);
                let sum: f32 = bins.iter().sum();
                let magnitude = match self.mode {
                    BandMode::Logarithmic => {
                        sum * (bins.len() + 1) as f32 / self.spectrum_len as f32
                    }
                    BandMode::Simple | BandMode::Linear => {
                        if bins.is_empty() {
                            0.0
                        } else {
                            sum / bins.len() as f32
                        }
                    }
                };
                Band {
                    start_bin: range.start,
                    width: range.width,
                    magnitude,
                    start_hz: Some(range.start as f32 / self.frame_duration),
                }
            })
            .collect();

        Ok(BandSet { bands })
    }

    /// Index of the first band whose start frequency is above `frequency` Hz.
    ///
    /// Fails with `NoBandForFrequency` when no band starts above it, which covers
    /// everything at or past the last band's start. In Simple mode the only band
    /// starts at 0 Hz, so every in-range frequency fails that way.
    pub fn band_for_frequency(&self, frequency: f32) -> Result<usize> {
        let nyquist = self.nyquist();
        if !(0.0..=nyquist).contains(&frequency) {
            return Err(AnalysisError::FrequencyOutOfRange { frequency, nyquist });
        }

        self.band_start_frequencies()
            .iter()
            .position(|&start| start > frequency)
            .ok_or(AnalysisError::NoBandForFrequency { frequency })
    }
}

fn check_band_count(band_count: usize, spectrum_len: usize) -> Result<()> {
    if band_count == 0 {
        return Err(AnalysisError::config("band_count", "must be at least 1"));
    }
    if band_count > spectrum_len {
        return Err(AnalysisError::config(
            "band_count",
            format!("{} bands exceed the {} spectrum bins", band_count, spectrum_len),
        ));
    }
    Ok(())
}

/// Width of each band when `spectrum_len` bins are split evenly into `band_count` bands.
pub fn linear_width(spectrum_len: usize, band_count: usize) -> usize {
    spectrum_len / band_count.max(1)
}

/// Band widths growing linearly with index so that they sum to `spectrum_len`
/// before flooring.
///
/// With `K` bands and first width `w1`, the slope is
/// `a = (2S - 2K*w1) / (K(K-1))` and band `b` (0-based) is `floor(a(b+1) + b0)`
/// wide, `b0 = w1 - a`.
pub fn logarithmic_widths(
    spectrum_len: usize,
    band_count: usize,
    first_band_width: usize,
) -> Result<Vec<usize>> {
    if band_count == 0 {
        return Err(AnalysisError::config("band_count", "must be at least 1"));
    }
    if band_count == 1 {
        return Ok(vec![spectrum_len]);
    }

    let s = spectrum_len as f64;
    let k = band_count as f64;
    let w1 = first_band_width as f64;
    let a = (2.0 * s - 2.0 * k * w1) / (k * (k - 1.0));
    let b0 = w1 - a;

    (0..band_count)
        .map(|band| {
            let width = (a * (band + 1) as f64 + b0).floor();
            if width < 1.0 {
                Err(AnalysisError::config(
                    "first_band_width",
                    format!(
                        "{} leaves band {} of {} with no bins",
                        first_band_width, band, band_count
                    ),
                ))
            } else {
                Ok(width as usize)
            }
        })
        .collect()
}
