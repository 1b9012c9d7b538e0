mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::cell::Cell;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cli::Cli;
use spectrobeat::audio::decode::{decode_audio, ClipSource};
use spectrobeat::audio::pipeline::{drive, Event, EventBus, FrameSource, Pacing, RunSummary};
use spectrobeat::audio::reactor::{BeatReactor, ReactorConfig};
use spectrobeat::config;
use spectrobeat::{PipelineConfig, SampleFrame, SamplePipeline};

/// Settings shared by every input after CLI and config file are merged.
struct Settings {
    analysis: PipelineConfig,
    reactor: ReactorConfig,
    pacing: Pacing,
    sample_events: bool,
    show_layout: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if let Some(ref path) = config::find_config(cli.config.clone()) {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.mode == spectrobeat::BandMode::Logarithmic { cli.mode = cfg.analysis.band_mode; }
            if cli.bands == 64 { cli.bands = cfg.analysis.band_count; }
            if cli.frame_size == 1024 { cli.frame_size = cfg.analysis.frame_size; }
            if cli.first_band_width == 1 { cli.first_band_width = cfg.analysis.first_band_width; }
            if !cli.realtime { cli.realtime = cfg.output.realtime; }
            if !cli.no_samples { cli.no_samples = !cfg.output.sample_events; }
            if cli.react_min_hz.is_none() { cli.react_min_hz = cfg.reactor.min_hz; }
            if cli.react_max_hz.is_none() { cli.react_max_hz = cfg.reactor.max_hz; }
            if cli.react_min_intensity == 0.0 { cli.react_min_intensity = cfg.reactor.min_intensity; }
            if cli.react_multiplier == 1.1 { cli.react_multiplier = cfg.reactor.multiplier; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    if cli.inputs.is_empty() {
        anyhow::bail!("At least one input audio file is required");
    }
    if cli.inputs.len() > 1 && cli.output.is_some() {
        anyhow::bail!("--output only applies to a single input; multiple inputs write <input>.events.jsonl");
    }
    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
    }

    let settings = Settings {
        analysis: PipelineConfig {
            frame_size: cli.frame_size,
            band_mode: cli.mode,
            band_count: cli.bands,
            first_band_width: cli.first_band_width,
        },
        reactor: ReactorConfig {
            min_hz: cli.react_min_hz,
            max_hz: cli.react_max_hz,
            min_intensity: cli.react_min_intensity,
            multiplier: cli.react_multiplier,
        },
        pacing: if cli.realtime { Pacing::RealTime } else { Pacing::Immediate },
        sample_events: !cli.no_samples,
        show_layout: cli.show_layout,
    };

    log::info!("spectrobeat - spectral beat detection");
    log::info!("Inputs: {}", cli.inputs.len());
    log::info!(
        "Mode: {:?}, bands: {}, frame size: {}",
        settings.analysis.band_mode, settings.analysis.band_count, settings.analysis.frame_size
    );

    let pb = if settings.pacing == Pacing::Immediate && !settings.show_layout {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")
                .context("Invalid progress bar template")?
                .progress_chars("=>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let single = cli.inputs.len() == 1;
    let results: Vec<(PathBuf, Result<RunSummary>)> = cli
        .inputs
        .par_iter()
        .map(|input| {
            let output = if single {
                cli.output.clone()
            } else {
                Some(events_path(input))
            };
            let result = analyze_file(input, output.as_deref(), &settings, &pb);
            (input.clone(), result)
        })
        .collect();

    pb.finish_with_message("Analysis complete");

    let mut failures = 0;
    for (input, result) in &results {
        match result {
            Ok(summary) => log::info!(
                "{}: {} frames, {} beats, {} skipped",
                input.display(),
                summary.frames,
                summary.beats,
                summary.skipped
            ),
            Err(err) => {
                failures += 1;
                log::error!("{}: {:#}", input.display(), err);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} inputs failed", failures, results.len());
    }
    Ok(())
}

fn events_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".events.jsonl");
    PathBuf::from(name)
}

fn analyze_file(
    input: &Path,
    output: Option<&Path>,
    settings: &Settings,
    pb: &ProgressBar,
) -> Result<RunSummary> {
    let clip = decode_audio(input)
        .with_context(|| format!("Failed to decode {}", input.display()))?;
    let mut pipeline = SamplePipeline::new(settings.analysis.clone(), clip.sample_rate)
        .context("Invalid analysis configuration")?;

    if settings.show_layout {
        print_layout(input, &pipeline);
        return Ok(RunSummary::default());
    }

    let reactor = if settings.reactor.is_enabled() {
        Some(
            BeatReactor::new(&settings.reactor, pipeline.partitioner())
                .context("Invalid reactor range")?,
        )
    } else {
        None
    };

    let out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let source = ClipSource::new(clip);
    pb.inc_length(source.frame_count(settings.analysis.frame_size) as u64);

    let clock = Rc::new(Cell::new(0u64));
    let mut writer = EventWriter {
        out,
        clock: Rc::clone(&clock),
        frame_duration: pipeline.frame_duration_secs(),
        reactor,
        sample_events: settings.sample_events,
        error: None,
    };

    let summary = {
        let mut bus = EventBus::new();
        bus.subscribe(|event: &Event| writer.write_event(event));
        let tracked = TrackedSource {
            inner: source,
            clock,
            pb: pb.clone(),
        };
        drive(tracked, &mut pipeline, &mut bus, settings.pacing)?
    };

    writer.finish().with_context(|| format!("Failed to write events for {}", input.display()))?;
    Ok(summary)
}

fn print_layout(input: &Path, pipeline: &SamplePipeline) {
    let partitioner = pipeline.partitioner();
    println!(
        "{} ({:?}, {} bands, Nyquist {:.0} Hz):",
        input.display(),
        partitioner.mode(),
        partitioner.band_count(),
        partitioner.nyquist()
    );
    let starts = partitioner.band_start_frequencies();
    for (band, (width, start_hz)) in partitioner.widths().iter().zip(starts).enumerate() {
        println!("  [{:3}] {:>9.1} Hz  {:4} bins", band, start_hz, width);
    }
}

/// Counts frames as they are read so event records can carry a frame index.
struct TrackedSource<S> {
    inner: S,
    clock: Rc<Cell<u64>>,
    pb: ProgressBar,
}

impl<S: FrameSource> FrameSource for TrackedSource<S> {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn read_frame(&mut self, frame: &mut SampleFrame) -> spectrobeat::Result<()> {
        self.inner.read_frame(frame)?;
        self.clock.set(self.clock.get() + 1);
        self.pb.inc(1);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum Record<'e> {
    Sample {
        frame: u64,
        time: f32,
        magnitudes: &'e [f32],
    },
    Beat {
        frame: u64,
        time: f32,
        bands: &'e [usize],
        magnitudes: &'e [f32],
    },
    Reaction {
        frame: u64,
        time: f32,
        intensity: f32,
    },
    Complete {
        frames: u64,
    },
}

struct EventWriter<W: Write> {
    out: W,
    clock: Rc<Cell<u64>>,
    frame_duration: f32,
    reactor: Option<BeatReactor>,
    sample_events: bool,
    error: Option<std::io::Error>,
}

impl<W: Write> EventWriter<W> {
    fn write_event(&mut self, event: &Event) {
        let frame = self.clock.get().saturating_sub(1);
        let time = frame as f32 * self.frame_duration;
        match event {
            Event::Sample { magnitudes } => {
                if self.sample_events {
                    self.write(&Record::Sample { frame, time, magnitudes });
                }
            }
            Event::Beat(beat) => {
                self.write(&Record::Beat {
                    frame,
                    time,
                    bands: &beat.bands,
                    magnitudes: &beat.magnitudes,
                });
                let reaction = self.reactor.as_ref().and_then(|r| r.react(beat));
                if let Some(intensity) = reaction {
                    self.write(&Record::Reaction { frame, time, intensity });
                }
            }
            Event::Complete { frames } => self.write(&Record::Complete { frames: *frames }),
        }
    }

    fn write(&mut self, record: &Record<'_>) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.out, record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(err) = result {
            self.error = Some(err);
        }
    }

    fn finish(mut self) -> std::io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()
    }
}
