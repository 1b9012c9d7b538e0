//! Iterative radix-2 Cooley-Tukey transform with a precomputed twiddle table.
//!
//! Stereo frames go through a single complex transform: left samples fill the
//! real part and right samples fill the imaginary part. Magnitudes computed from
//! that output are what the band partitioner and beat detector consume, so the
//! encoding is part of the contract and must not be split into two real
//! transforms. Output is unnormalized (no 1/N scaling).

use rustfft::num_complex::Complex;

use crate::error::{AnalysisError, Result};

pub type ComplexBuffer = Vec<Complex<f64>>;

/// In-place forward transform of a fixed power-of-two length.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    size: usize,
    bits: u32,
    /// `stages[s][j]` holds `(sin, cos)` for stage size `2 << s` and butterfly index `j`.
    stages: Vec<Vec<(f64, f64)>>,
}

impl TransformEngine {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(AnalysisError::config(
                "frame_size",
                format!("{} is not a power of two", size),
            ));
        }

        let bits = size.trailing_zeros();
        let mut stages = Vec::with_capacity(bits as usize);
        let mut stage_size = 2;
        while stage_size <= size {
            let pairs = (0..stage_size / 2)
                .map(|j| {
                    let angle = -2.0 * std::f64::consts::PI * (j as f64 / stage_size as f64);
                    (angle.sin(), angle.cos())
                })
                .collect();
            stages.push(pairs);
            stage_size <<= 1;
        }

        Ok(Self { size, bits, stages })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Twiddle `(sin, cos)` for a stage size and butterfly index, if that pair was precomputed.
    pub fn twiddle(&self, stage_size: usize, j: usize) -> Option<(f64, f64)> {
        if stage_size < 2 || !stage_size.is_power_of_two() || stage_size > self.size {
            return None;
        }
        let stage = stage_size.trailing_zeros() as usize - 1;
        self.stages[stage].get(j).copied()
    }

    /// Transform `buffer` in place. The buffer is left untouched when its length is wrong.
    pub fn transform(&self, buffer: &mut [Complex<f64>]) -> Result<()> {
        if buffer.len() != self.size {
            return Err(AnalysisError::LengthMismatch {
                expected: self.size,
                actual: buffer.len(),
            });
        }

        permute(buffer, self.bits);

        for (stage, twiddles) in self.stages.iter().enumerate() {
            let stage_size = 2usize << stage;
            let half = stage_size / 2;
            for block in buffer.chunks_exact_mut(stage_size) {
                let (evens, odds) = block.split_at_mut(half);
                for (j, (even, odd)) in evens.iter_mut().zip(odds.iter_mut()).enumerate() {
                    let (sin, cos) = twiddles[j];
                    let signal = Complex::new(cos, sin) * *odd;
                    let e = *even;
                    *even = e + signal;
                    *odd = e - signal;
                }
            }
        }

        Ok(())
    }
}

/// Reverse the lowest `bits` bits of `value`.
pub fn bit_reverse(mut value: usize, bits: u32) -> usize {
    let mut reversed = 0;
    for _ in 0..bits {
        reversed = (reversed << 1) | (value & 1);
        value >>= 1;
    }
    reversed
}

/// Bit-reversal permutation over a power-of-two slice. Applying it twice restores the input.
pub fn bit_reverse_permute<T>(buffer: &mut [T]) -> Result<()> {
    let len = buffer.len();
    if len == 0 || !len.is_power_of_two() {
        return Err(AnalysisError::LengthMismatch {
            expected: len.next_power_of_two(),
            actual: len,
        });
    }
    permute(buffer, len.trailing_zeros());
    Ok(())
}

fn permute<T>(buffer: &mut [T], bits: u32) {
    for i in 1..buffer.len() {
        let reversed = bit_reverse(i, bits);
        if reversed > i {
            buffer.swap(i, reversed);
        }
    }
}

/// Magnitudes of bins `0..=N/2` of a transformed buffer.
pub fn magnitude_spectrum(buffer: &[Complex<f64>]) -> Vec<f32> {
    let bins = buffer.len() / 2 + 1;
    buffer
        .iter()
        .take(bins)
        .map(|c| (c.re * c.re + c.im * c.im).sqrt() as f32)
        .collect()
}

/// Pack a stereo frame into one complex buffer: left → real, right → imaginary.
pub fn pack_stereo(left: &[f32], right: &[f32]) -> ComplexBuffer {
    left.iter()
        .zip(right.iter())
        .map(|(&l, &r)| Complex::new(l as f64, r as f64))
        .collect()
}
