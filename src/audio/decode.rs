use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::features::SampleFrame;
use super::pipeline::FrameSource;
use crate::error::{AnalysisError, Result};

/// Decoded audio split into two channels.
#[derive(Clone, Debug, Default)]
pub struct StereoClip {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source stream
    pub channels: usize,
}

impl StereoClip {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.left.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Decode an audio file. Mono is copied to both channels; channels past the second are dropped.
pub fn decode_audio(path: &Path) -> Result<StereoClip> {
    let file = std::fs::File::open(path).map_err(|source| AnalysisError::Io {
        context: format!("Failed to open audio file: {}", path.display()),
        source,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or(symphonia::core::errors::Error::Unsupported("no audio tracks found"))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count()).max(1);
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalysisError::config("sample_rate", "unknown sample rate in stream"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())?;

    let mut clip = StereoClip {
        sample_rate,
        channels,
        ..Default::default()
    };

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        // Layout of the decoded buffer wins over what the container advertised
        clip.channels = spec.channels.count().max(1);
        let channels = clip.channels;
        split_interleaved(sample_buf.samples(), channels, &mut clip);
    }

    log::info!(
        "Decoded audio: {} samples/channel, {} channels, {}Hz, {:.1}s",
        clip.len(),
        clip.channels,
        sample_rate,
        clip.duration_secs()
    );

    Ok(clip)
}

fn split_interleaved(samples: &[f32], channels: usize, clip: &mut StereoClip) {
    if channels == 1 {
        clip.left.extend_from_slice(samples);
        clip.right.extend_from_slice(samples);
        return;
    }
    for frame_samples in samples.chunks_exact(channels) {
        clip.left.push(frame_samples[0]);
        clip.right.push(frame_samples[1]);
    }
}

/// Plays a decoded clip back one frame at a time.
#[derive(Clone, Debug)]
pub struct ClipSource {
    clip: StereoClip,
    position: usize,
}

impl ClipSource {
    pub fn new(clip: StereoClip) -> Self {
        Self { clip, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Frames needed to cover the clip, counting a final partial frame.
    pub fn frame_count(&self, frame_size: usize) -> usize {
        self.clip.len().div_ceil(frame_size.max(1))
    }
}

impl FrameSource for ClipSource {
    fn sample_rate(&self) -> u32 {
        self.clip.sample_rate
    }

    fn channels(&self) -> usize {
        self.clip.channels
    }

    fn is_active(&self) -> bool {
        self.position < self.clip.len()
    }

    /// The last frame of the clip is zero-padded.
    fn read_frame(&mut self, frame: &mut SampleFrame) -> Result<()> {
        let len = frame.left.len();
        if frame.right.len() != len {
            return Err(AnalysisError::LengthMismatch {
                expected: len,
                actual: frame.right.len(),
            });
        }

        let end = (self.position + len).min(self.clip.len());
        let available = end - self.position;
        frame.left[..available].copy_from_slice(&self.clip.left[self.position..end]);
        frame.right[..available].copy_from_slice(&self.clip.right[self.position..end]);
        frame.left[available..].fill(0.0);
        frame.right[available..].fill(0.0);

        self.position = end;
        Ok(())
    }
}
