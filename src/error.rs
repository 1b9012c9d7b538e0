use thiserror::Error;

/// Errors raised by the analysis pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Invalid frame size, band count or band width. Raised before the pipeline starts.
    #[error("invalid configuration for '{field}': {reason}")]
    Configuration {
        field: &'static str,
        reason: String,
    },

    /// A buffer or frame whose length does not match the configured size.
    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Frequency query outside [0, nyquist].
    #[error("frequency {frequency} Hz is outside [0, {nyquist}] Hz")]
    FrequencyOutOfRange { frequency: f32, nyquist: f32 },

    /// No band covers a frequency that passed the range check.
    #[error("no band covers {frequency} Hz; band layout does not span the spectrum")]
    NoBandForFrequency { frequency: f32 },

    #[error("audio decode failed: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
