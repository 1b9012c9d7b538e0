use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::pipeline::PipelineConfig;
use crate::audio::reactor::ReactorConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: PipelineConfig,
    #[serde(default)]
    pub reactor: ReactorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Pace frames at the audio's own rate instead of as fast as possible
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_sample_events")]
    pub sample_events: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            realtime: false,
            sample_events: default_sample_events(),
        }
    }
}

fn default_sample_events() -> bool { true }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// Explicit path, else `./spectrobeat.toml`, else the per-user config locations.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("spectrobeat.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("spectrobeat").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("spectrobeat").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bands::BandMode;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.analysis, PipelineConfig::default());
        assert_eq!(config.analysis.frame_size, 1024);
        assert_eq!(config.analysis.band_count, 64);
        assert!(!config.reactor.is_enabled());
        assert!(config.output.sample_events);
    }

    #[test]
    fn sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [analysis]
            band_mode = "linear"
            band_count = 32

            [reactor]
            min_hz = 40.0
            max_hz = 250.0

            [output]
            realtime = true
            "#,
        )
        .unwrap();
        assert_eq!(config.analysis.band_mode, BandMode::Linear);
        assert_eq!(config.analysis.band_count, 32);
        assert_eq!(config.analysis.first_band_width, 1);
        assert!(config.reactor.is_enabled());
        assert!((config.reactor.multiplier - 1.1).abs() < 1e-6);
        assert!(config.output.realtime);
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/tmp/custom.toml");
        assert_eq!(find_config(Some(path.clone())), Some(path));
    }

    #[test]
    fn unreadable_config_is_none() {
        assert!(load_config(Path::new("/definitely/not/here.toml")).is_none());
    }
}
