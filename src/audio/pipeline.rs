//! Per-frame analysis pipeline and the loop that drives it.
//!
//! One call to [`SamplePipeline::step`] is one sampling period: transform,
//! partition, detect. Calls must not overlap; the pipeline owns all of its
//! history state and is not meant to be shared between threads.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::bands::{BandMode, SpectrumPartitioner};
use super::beat::{BandDetector, BandDetection, SimpleDetector, SimpleStats};
use super::features::{BandSet, BeatEvent, SampleFrame};
use super::fft::{self, TransformEngine};
use crate::error::{AnalysisError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Samples per channel per frame (power of two)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default)]
    pub band_mode: BandMode,
    /// Ignored in simple mode, which always tracks one channel
    #[serde(default = "default_band_count")]
    pub band_count: usize,
    /// Width in bins of the first logarithmic band
    #[serde(default = "default_first_band_width")]
    pub first_band_width: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            band_mode: BandMode::default(),
            band_count: default_band_count(),
            first_band_width: default_first_band_width(),
        }
    }
}

pub fn default_frame_size() -> usize { 1024 }
pub fn default_band_count() -> usize { 64 }
pub fn default_first_band_width() -> usize { 1 }

impl PipelineConfig {
    /// Number of tracked channels: 1 in simple mode, `band_count` otherwise.
    pub fn channel_count(&self) -> usize {
        match self.band_mode {
            BandMode::Simple => 1,
            BandMode::Linear | BandMode::Logarithmic => self.band_count,
        }
    }

    /// History entries covering roughly one second.
    pub fn history_len(&self, sample_rate: u32) -> usize {
        sample_rate as usize / self.frame_size.max(1)
    }

    pub fn validate(&self, sample_rate: u32) -> Result<()> {
        if self.frame_size < 2 || !self.frame_size.is_power_of_two() {
            return Err(AnalysisError::config(
                "frame_size",
                format!("{} must be a power of two of at least 2", self.frame_size),
            ));
        }
        if self.history_len(sample_rate) == 0 {
            return Err(AnalysisError::config(
                "frame_size",
                format!(
                    "{} samples is longer than one second at {} Hz",
                    self.frame_size, sample_rate
                ),
            ));
        }
        if self.band_mode != BandMode::Simple && self.band_count == 0 {
            return Err(AnalysisError::config("band_count", "must be at least 1"));
        }
        if self.first_band_width == 0 {
            return Err(AnalysisError::config("first_band_width", "must be at least 1"));
        }
        Ok(())
    }
}

/// Result of one step, tagged by what should be published.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Simple mode, no beat
    Silent,
    /// Simple mode beat
    Beat(BeatEvent),
    /// Banded mode, no band fired
    SampleOnly(Vec<f32>),
    SampleAndBeat(Vec<f32>, BeatEvent),
}

impl StepOutcome {
    pub fn sample(&self) -> Option<&[f32]> {
        match self {
            StepOutcome::SampleOnly(magnitudes) | StepOutcome::SampleAndBeat(magnitudes, _) => {
                Some(magnitudes)
            }
            StepOutcome::Silent | StepOutcome::Beat(_) => None,
        }
    }

    pub fn beat(&self) -> Option<&BeatEvent> {
        match self {
            StepOutcome::Beat(beat) | StepOutcome::SampleAndBeat(_, beat) => Some(beat),
            StepOutcome::Silent | StepOutcome::SampleOnly(_) => None,
        }
    }

    /// Events in publish order: sample first, then beat.
    pub fn into_events(self) -> Vec<Event> {
        match self {
            StepOutcome::Silent => Vec::new(),
            StepOutcome::Beat(beat) => vec![Event::Beat(beat)],
            StepOutcome::SampleOnly(magnitudes) => vec![Event::Sample { magnitudes }],
            StepOutcome::SampleAndBeat(magnitudes, beat) => {
                vec![Event::Sample { magnitudes }, Event::Beat(beat)]
            }
        }
    }
}

/// Intermediate detection values, for hosts that want to visualize them.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Diagnostics {
    Simple(SimpleStats),
    Banded(BandDetection),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepReport {
    pub frame_index: u64,
    pub outcome: StepOutcome,
    /// Band layout and magnitudes; `None` in simple mode
    pub bands: Option<BandSet>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug)]
enum Detector {
    Simple(SimpleDetector),
    Banded(BandDetector),
}

pub struct SamplePipeline {
    config: PipelineConfig,
    sample_rate: u32,
    engine: TransformEngine,
    partitioner: SpectrumPartitioner,
    detector: Detector,
    frames: u64,
}

impl SamplePipeline {
    pub fn new(config: PipelineConfig, sample_rate: u32) -> Result<Self> {
        config.validate(sample_rate)?;

        let engine = TransformEngine::new(config.frame_size)?;
        let partitioner = SpectrumPartitioner::new(
            config.band_mode,
            config.band_count,
            config.first_band_width,
            config.frame_size,
            sample_rate,
        )?;
        let history_len = config.history_len(sample_rate);
        let detector = match config.band_mode {
            BandMode::Simple => Detector::Simple(SimpleDetector::new(history_len)),
            BandMode::Linear | BandMode::Logarithmic => {
                Detector::Banded(BandDetector::new(partitioner.band_count(), history_len))
            }
        };

        log::info!(
            "Pipeline: {:?} mode, {} bands, frame {} samples @ {}Hz ({:.1}ms), history {} frames",
            config.band_mode,
            partitioner.band_count(),
            config.frame_size,
            sample_rate,
            config.frame_size as f32 / sample_rate as f32 * 1000.0,
            history_len
        );

        Ok(Self {
            config,
            sample_rate,
            engine,
            partitioner,
            detector,
            frames: 0,
        })
    }

    /// Replace the configuration. All history restarts from zero.
    pub fn reconfigure(&mut self, config: PipelineConfig) -> Result<()> {
        *self = Self::new(config, self.sample_rate)?;
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn partitioner(&self) -> &SpectrumPartitioner {
        &self.partitioner
    }

    /// Length of one frame in seconds; also the scheduling period.
    pub fn frame_duration_secs(&self) -> f32 {
        self.config.frame_size as f32 / self.sample_rate as f32
    }

    pub fn history_len(&self) -> usize {
        self.config.history_len(self.sample_rate)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn band_for_frequency(&self, frequency: f32) -> Result<usize> {
        self.partitioner.band_for_frequency(frequency)
    }

    /// Process one frame. On error no history is modified.
    pub fn step(&mut self, frame: &SampleFrame) -> Result<StepReport> {
        let expected = self.config.frame_size;
        for actual in [frame.left.len(), frame.right.len()] {
            if actual != expected {
                return Err(AnalysisError::LengthMismatch { expected, actual });
            }
        }

        let frame_index = self.frames;
        let report = match &mut self.detector {
            Detector::Simple(detector) => {
                let stats = detector.detect(frame.energy());
                let outcome = if stats.fired {
                    StepOutcome::Beat(BeatEvent {
                        bands: vec![0],
                        magnitudes: vec![stats.instant_energy],
                    })
                } else {
                    StepOutcome::Silent
                };
                StepReport {
                    frame_index,
                    outcome,
                    bands: None,
                    diagnostics: Diagnostics::Simple(stats),
                }
            }
            Detector::Banded(detector) => {
                let mut buffer = fft::pack_stereo(&frame.left, &frame.right);
                self.engine.transform(&mut buffer)?;
                let spectrum = fft::magnitude_spectrum(&buffer);
                let bands = self.partitioner.partition(&spectrum)?;
                let magnitudes = bands.magnitudes();
                let detection = detector.detect(&magnitudes)?;

                let outcome = if detection.fired.is_empty() {
                    StepOutcome::SampleOnly(magnitudes)
                } else {
                    let beat = BeatEvent {
                        bands: detection.fired.clone(),
                        magnitudes: magnitudes.clone(),
                    };
                    StepOutcome::SampleAndBeat(magnitudes, beat)
                };
                StepReport {
                    frame_index,
                    outcome,
                    bands: Some(bands),
                    diagnostics: Diagnostics::Banded(detection),
                }
            }
        };

        if let Some(beat) = report.outcome.beat() {
            log::debug!("Frame {}: beat in bands {:?}", frame_index, beat.bands);
        }
        self.frames += 1;
        Ok(report)
    }
}

/// Messages delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Sample { magnitudes: Vec<f32> },
    Beat(BeatEvent),
    /// The capture source went inactive
    Complete { frames: u64 },
}

pub trait Subscriber {
    fn on_event(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> Subscriber for F {
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Publish-subscribe fan-out; subscribers see events in registration order.
#[derive(Default)]
pub struct EventBus<'a> {
    subscribers: Vec<Box<dyn Subscriber + 'a>>,
}

impl<'a> EventBus<'a> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: impl Subscriber + 'a) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&mut self, event: &Event) {
        for subscriber in &mut self.subscribers {
            subscriber.on_event(event);
        }
    }
}

/// Capture collaborator supplying stereo frames.
pub trait FrameSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> usize;
    /// Whether more audio is available; polled before every frame.
    fn is_active(&self) -> bool;
    /// Fill both channels of `frame` with the next window of samples.
    fn read_frame(&mut self, frame: &mut SampleFrame) -> Result<()>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn read_frame(&mut self, frame: &mut SampleFrame) -> Result<()> {
        (**self).read_frame(frame)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Run frames back to back
    #[default]
    Immediate,
    /// Wait out one frame duration per invocation
    RealTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub beats: u64,
    pub skipped: u64,
}

/// Drive `pipeline` from `source` until it goes inactive, then publish `Complete`.
///
/// The source must run at the pipeline's sample rate. A frame that fails to
/// process is logged and skipped; capture errors end the run.
pub fn drive<S: FrameSource>(
    mut source: S,
    pipeline: &mut SamplePipeline,
    bus: &mut EventBus<'_>,
    pacing: Pacing,
) -> Result<RunSummary> {
    if source.sample_rate() != pipeline.sample_rate() {
        return Err(AnalysisError::config(
            "sample_rate",
            format!(
                "source runs at {} Hz but the pipeline was built for {} Hz",
                source.sample_rate(),
                pipeline.sample_rate()
            ),
        ));
    }
    log::info!(
        "Capture: {} Hz, {} channel(s), {:?} pacing",
        source.sample_rate(),
        source.channels(),
        pacing
    );

    let period = Duration::from_secs_f32(pipeline.frame_duration_secs());
    let mut frame = SampleFrame::silent(pipeline.config().frame_size);
    let mut summary = RunSummary::default();

    while source.is_active() {
        let started = Instant::now();
        source.read_frame(&mut frame)?;

        match pipeline.step(&frame) {
            Ok(report) => {
                summary.frames += 1;
                if report.outcome.beat().is_some() {
                    summary.beats += 1;
                }
                for event in report.outcome.into_events() {
                    bus.publish(&event);
                }
            }
            Err(err) => {
                log::warn!("Skipping frame {}: {}", summary.frames + summary.skipped, err);
                summary.skipped += 1;
            }
        }

        if pacing == Pacing::RealTime {
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    bus.publish(&Event::Complete {
        frames: summary.frames,
    });
    log::info!(
        "Run complete: {} frames, {} beats, {} skipped",
        summary.frames,
        summary.beats,
        summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: BandMode, frame_size: usize, band_count: usize) -> PipelineConfig {
        PipelineConfig {
            frame_size,
            band_mode: mode,
            band_count,
            first_band_width: 1,
        }
    }

    struct ScriptedSource {
        frames: Vec<SampleFrame>,
        next: usize,
        rate: u32,
    }

    impl ScriptedSource {
        fn new(frames: Vec<SampleFrame>) -> Self {
            Self { frames, next: 0, rate: 44100 }
        }
    }

    impl FrameSource for ScriptedSource {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn channels(&self) -> usize {
            2
        }

        fn is_active(&self) -> bool {
            self.next < self.frames.len()
        }

        fn read_frame(&mut self, frame: &mut SampleFrame) -> Result<()> {
            *frame = self.frames[self.next].clone();
            self.next += 1;
            Ok(())
        }
    }

    #[test]
    fn validate_rejects_bad_configs() {
        assert!(config(BandMode::Linear, 1000, 8).validate(44100).is_err());
        assert!(config(BandMode::Linear, 1, 8).validate(44100).is_err());
        assert!(config(BandMode::Linear, 1024, 0).validate(44100).is_err());
        assert!(config(BandMode::Linear, 65536, 8).validate(44100).is_err());
        assert!(config(BandMode::Simple, 1024, 0).validate(44100).is_ok());
        assert!(SamplePipeline::new(config(BandMode::Linear, 8, 6), 44100).is_err());
    }

    #[test]
    fn history_covers_about_one_second() {
        let pipeline = SamplePipeline::new(PipelineConfig::default(), 44100).unwrap();
        assert_eq!(pipeline.history_len(), 43);
        assert!((pipeline.frame_duration_secs() - 1024.0 / 44100.0).abs() < 1e-7);
    }

    #[test]
    fn simple_mode_silence_never_beats() {
        let mut pipeline = SamplePipeline::new(config(BandMode::Simple, 4, 1), 44100).unwrap();
        let frames_per_two_seconds = 2 * 44100 / 4;
        let silent = SampleFrame::silent(4);
        for _ in 0..frames_per_two_seconds {
            let report = pipeline.step(&silent).unwrap();
            assert_eq!(report.outcome, StepOutcome::Silent);
        }
    }

    #[test]
    fn simple_mode_beats_on_loud_frame() {
        let mut pipeline =
            SamplePipeline::new(config(BandMode::Simple, 1024, 1), 44100).unwrap();
        for _ in 0..50 {
            pipeline.step(&SampleFrame::constant(1024, 0.01)).unwrap();
        }
        let report = pipeline.step(&SampleFrame::constant(1024, 1.0)).unwrap();
        match report.outcome {
            StepOutcome::Beat(beat) => {
                assert_eq!(beat.bands, vec![0]);
                assert!((beat.magnitudes[0] - 2048.0).abs() < 1e-2);
            }
            other => panic!("expected beat, got {:?}", other),
        }
    }

    #[test]
    fn banded_mode_always_samples() {
        let mut pipeline =
            SamplePipeline::new(config(BandMode::Logarithmic, 256, 16), 44100).unwrap();
        let report = pipeline.step(&SampleFrame::silent(256)).unwrap();
        assert_eq!(report.outcome, StepOutcome::SampleOnly(vec![0.0; 16]));
        assert_eq!(report.bands.as_ref().map(|b| b.len()), Some(16));
    }

    #[test]
    fn wrong_frame_length_leaves_state_untouched() {
        let mut pipeline = SamplePipeline::new(config(BandMode::Linear, 64, 4), 44100).unwrap();
        let short = SampleFrame::silent(32);
        assert!(matches!(
            pipeline.step(&short),
            Err(AnalysisError::LengthMismatch { expected: 64, actual: 32 })
        ));
        assert_eq!(pipeline.frames_processed(), 0);

        // History still zero: any non-zero frame fires every band with energy.
        let report = pipeline.step(&SampleFrame::constant(64, 0.5)).unwrap();
        assert_eq!(report.outcome.beat().map(|b| b.bands.clone()), Some(vec![0]));
    }

    #[test]
    fn reconfigure_resets_history() {
        let mut pipeline = SamplePipeline::new(config(BandMode::Linear, 64, 4), 44100).unwrap();
        for _ in 0..10 {
            pipeline.step(&SampleFrame::constant(64, 0.5)).unwrap();
        }
        pipeline.reconfigure(config(BandMode::Linear, 64, 8)).unwrap();
        assert_eq!(pipeline.frames_processed(), 0);
        assert_eq!(pipeline.partitioner().band_count(), 8);
        let report = pipeline.step(&SampleFrame::constant(64, 0.5)).unwrap();
        assert!(report.outcome.beat().is_some());
    }

    #[test]
    fn bus_delivers_in_registration_order() {
        let mut seen: Vec<(u8, String)> = Vec::new();
        {
            let seen = std::cell::RefCell::new(&mut seen);
            let mut bus = EventBus::new();
            bus.subscribe(|event: &Event| seen.borrow_mut().push((1, format!("{:?}", event))));
            bus.subscribe(|event: &Event| seen.borrow_mut().push((2, format!("{:?}", event))));
            bus.publish(&Event::Complete { frames: 3 });
            assert_eq!(bus.len(), 2);
        }
        assert_eq!(seen.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn drive_publishes_complete_last() {
        let frames = vec![SampleFrame::silent(64); 5];
        let mut pipeline = SamplePipeline::new(config(BandMode::Linear, 64, 4), 44100).unwrap();
        let mut events = Vec::new();
        let summary = {
            let mut bus = EventBus::new();
            bus.subscribe(|event: &Event| events.push(event.clone()));
            drive(
                ScriptedSource::new(frames),
                &mut pipeline,
                &mut bus,
                Pacing::Immediate,
            )
            .unwrap()
        };
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.beats, 0);
        assert_eq!(events.len(), 6);
        assert_eq!(events.last(), Some(&Event::Complete { frames: 5 }));
    }

    #[test]
    fn drive_skips_bad_frames() {
        let frames = vec![SampleFrame::silent(64), SampleFrame::silent(16), SampleFrame::silent(64)];
        let mut pipeline = SamplePipeline::new(config(BandMode::Linear, 64, 4), 44100).unwrap();
        let mut bus = EventBus::new();
        let summary =
            drive(ScriptedSource::new(frames), &mut pipeline, &mut bus, Pacing::Immediate)
                .unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn drive_rejects_source_at_other_rate() {
        let source = ScriptedSource {
            rate: 48000,
            ..ScriptedSource::new(vec![SampleFrame::silent(64); 3])
        };
        let mut pipeline = SamplePipeline::new(config(BandMode::Linear, 64, 4), 44100).unwrap();
        let mut events = 0;
        let result = {
            let mut bus = EventBus::new();
            bus.subscribe(|_: &Event| events += 1);
            drive(source, &mut pipeline, &mut bus, Pacing::Immediate)
        };
        assert!(matches!(
            result,
            Err(AnalysisError::Configuration { field: "sample_rate", .. })
        ));
        assert_eq!(events, 0);
        assert_eq!(pipeline.frames_processed(), 0);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&Event::Sample { magnitudes: vec![1.0] }).unwrap();
        assert_eq!(json, r#"{"event":"sample","magnitudes":[1.0]}"#);
        let json = serde_json::to_string(&Event::Beat(BeatEvent {
            bands: vec![2],
            magnitudes: vec![0.5],
        }))
        .unwrap();
        assert_eq!(json, r#"{"event":"beat","bands":[2],"magnitudes":[0.5]}"#);
    }
}
