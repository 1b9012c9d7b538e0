use clap::Parser;
use std::path::PathBuf;

use spectrobeat::BandMode;

#[derive(Parser, Debug)]
#[command(name = "spectrobeat", about = "Spectral band analysis and beat detection for audio files")]
pub struct Cli {
    /// Input audio files (WAV, MP3, FLAC, OGG)
    pub inputs: Vec<PathBuf>,

    /// Output file for JSON-lines events (single input only; defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Band partition mode
    #[arg(short, long, value_enum, default_value_t = BandMode::Logarithmic)]
    pub mode: BandMode,

    /// Number of bands (ignored in simple mode)
    #[arg(short, long, default_value_t = 64)]
    pub bands: usize,

    /// Samples per channel per frame (power of two)
    #[arg(long, default_value_t = 1024)]
    pub frame_size: usize,

    /// Width in bins of the first logarithmic band
    #[arg(long, default_value_t = 1)]
    pub first_band_width: usize,

    /// Pace frames in real time instead of as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Only write beat, reaction and completion events
    #[arg(long)]
    pub no_samples: bool,

    /// Print the band layout and exit
    #[arg(long)]
    pub show_layout: bool,

    /// Lower edge (Hz) of the beat reaction range
    #[arg(long)]
    pub react_min_hz: Option<f32>,

    /// Upper edge (Hz) of the beat reaction range
    #[arg(long)]
    pub react_max_hz: Option<f32>,

    /// Minimum summed intensity for a reaction
    #[arg(long, default_value_t = 0.0)]
    pub react_min_intensity: f32,

    /// Scale applied to reaction intensities
    #[arg(long, default_value_t = 1.1)]
    pub react_multiplier: f32,

    /// Config file (defaults to ./spectrobeat.toml or the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
