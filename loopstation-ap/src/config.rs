//! Configuration for the loop station audio player
//!
//! Loaded once at startup from a TOML file (see `loopstation_common::config`
//! for path resolution). Engine timing constants are given in milliseconds
//! and converted to ticks by `EngineSettings` accessors.

use crate::error::{Error, Result};
use loopstation_common::timing::ms_to_ticks;
use loopstation_common::{CrossfadeMode, FadeCurve};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "LOOPSTATION_CONFIG";

/// Environment variable naming the asset root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "LOOPSTATION_ROOT";

fn default_bind_addr() -> String {
    "127.0.0.1:5750".to_string()
}

fn default_initial_level() -> f32 {
    1.0
}

/// Audio player configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base folder for relative track URLs
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// cpal output device name (default device if unset)
    #[serde(default)]
    pub output_device: Option<String>,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Tracks in display order
    #[serde(default, rename = "track")]
    pub tracks: Vec<TrackConfig>,
}

/// One configured loop
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackConfig {
    pub id: String,
    pub url: String,
    /// Slider position restored by "mute all" (0.0-1.0)
    #[serde(default = "default_initial_level")]
    pub initial_level: f32,
}

/// Scheduling and smoothing constants
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on a loop's crossfade length
    pub max_fade_ms: u64,
    /// Crossfade length as a fraction of the loop length (capped by `max_fade_ms`)
    pub fade_fraction: f64,
    /// How far ahead of a fade the next repetition is committed
    pub safety_margin_ms: u64,
    /// Offset of the shared origin from "now" on first start
    pub start_delay_ms: u64,
    /// Offset of the shared origin from "now" on reset / master start
    pub reset_start_delay_ms: u64,
    /// Hard stop issued this long after a repetition's end
    pub stop_tail_ms: u64,
    /// Time constant for level smoothing
    pub level_time_constant_ms: u64,
    /// Levels at or below this count as inaudible
    pub audibility_threshold: f32,
    pub fade_curve: FadeCurve,
    pub crossfade_mode: CrossfadeMode,
    /// Broadcast channel capacity for UI events
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_fade_ms: 30,
            fade_fraction: 0.1,
            safety_margin_ms: 50,
            start_delay_ms: 100,
            reset_start_delay_ms: 120,
            stop_tail_ms: 2,
            level_time_constant_ms: 10,
            audibility_threshold: 0.001,
            fade_curve: FadeCurve::Linear,
            crossfade_mode: CrossfadeMode::Segue,
            event_capacity: 256,
        }
    }
}

impl EngineSettings {
    pub fn max_fade_ticks(&self) -> i64 {
        ms_to_ticks(self.max_fade_ms as i64)
    }

    pub fn safety_margin_ticks(&self) -> i64 {
        ms_to_ticks(self.safety_margin_ms as i64)
    }

    pub fn start_delay_ticks(&self) -> i64 {
        ms_to_ticks(self.start_delay_ms as i64)
    }

    pub fn reset_start_delay_ticks(&self) -> i64 {
        ms_to_ticks(self.reset_start_delay_ms as i64)
    }

    pub fn stop_tail_ticks(&self) -> i64 {
        ms_to_ticks(self.stop_tail_ms as i64)
    }

    pub fn level_time_constant_ticks(&self) -> i64 {
        ms_to_ticks(self.level_time_constant_ms as i64)
    }

    /// Crossfade length for a loop: `min(max_fade, fade_fraction × loop)`
    pub fn fade_ticks_for(&self, loop_ticks: i64) -> i64 {
        let proportional = (loop_ticks as f64 * self.fade_fraction).floor() as i64;
        proportional.min(self.max_fade_ticks())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_fade_ms == 0 {
            return Err(Error::Config("engine.max_fade_ms must be > 0".to_string()));
        }
        if !(self.fade_fraction > 0.0 && self.fade_fraction < 0.5) {
            return Err(Error::Config(format!(
                "engine.fade_fraction must be in (0, 0.5), got {}",
                self.fade_fraction
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("engine.event_capacity must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.audibility_threshold) {
            return Err(Error::Config(format!(
                "engine.audibility_threshold must be in [0, 1), got {}",
                self.audibility_threshold
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config: Config = loopstation_common::config::load_toml(path)?;
        config.validate()?;
        info!(
            "Loaded configuration from {} ({} tracks)",
            path.display(),
            config.tracks.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(Error::Config("at least one [[track]] is required".to_string()));
        }

        let mut seen = HashSet::new();
        for track in &self.tracks {
            if track.id.trim().is_empty() {
                return Err(Error::Config("track id must not be empty".to_string()));
            }
            if track.url.trim().is_empty() {
                return Err(Error::Config(format!("track '{}' has an empty url", track.id)));
            }
            if !seen.insert(track.id.as_str()) {
                return Err(Error::Config(format!("duplicate track id '{}'", track.id)));
            }
            if !(0.0..=1.0).contains(&track.initial_level) {
                return Err(Error::Config(format!(
                    "track '{}' initial_level must be in [0, 1], got {}",
                    track.id, track.initial_level
                )));
            }
        }

        self.engine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopstation_common::timing::TICK_RATE;

    const MINIMAL: &str = r#"
[[track]]
id = "piano"
url = "audio/piano.wav"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:5750");
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.tracks[0].initial_level, 1.0);
        assert!(config.root_folder.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
bind_addr = "0.0.0.0:9000"
root_folder = "/srv/loops"

[engine]
max_fade_ms = 20
fade_curve = "cosine"
crossfade_mode = "overlap"

[[track]]
id = "drums"
url = "https://example.com/drums.wav"
initial_level = 0.5

[[track]]
id = "bass"
url = "bass.flac"
"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/loops")));
        assert_eq!(config.engine.max_fade_ms, 20);
        assert_eq!(config.engine.fade_curve, FadeCurve::SCurve);
        assert_eq!(config.engine.crossfade_mode, CrossfadeMode::Overlap);
        assert_eq!(config.engine.safety_margin_ms, 50);
        assert_eq!(config.tracks.len(), 2);
        assert_eq!(config.tracks[0].initial_level, 0.5);
    }

    #[test]
    fn test_rejects_empty_track_list() {
        assert!(matches!(Config::from_toml_str(""), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let text = format!("{}{}", MINIMAL, MINIMAL);
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_out_of_range_level() {
        let text = "[[track]]\nid = \"a\"\nurl = \"a.wav\"\ninitial_level = 1.5\n";
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_bad_fade_fraction() {
        let text = format!("[engine]\nfade_fraction = 0.5\n{}", MINIMAL);
        assert!(Config::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_fade_ticks_rule() {
        let engine = EngineSettings::default();
        // 2 s loop: 10% is 200 ms, capped at 30 ms
        assert_eq!(engine.fade_ticks_for(2 * TICK_RATE), ms_to_ticks(30));
        // 100 ms loop: 10% is 10 ms
        assert_eq!(engine.fade_ticks_for(TICK_RATE / 10), ms_to_ticks(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tracks[0].id, "piano");
    }
}
