use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// Process-wide, immutable configuration. Constructed once at startup and shared
/// by reference (or `Arc`) through every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub music_library: PathBuf,

    pub buffer_size: usize,
    pub sample_rate: u32,
    pub target_sample_rate: u32,
    pub audio_device_index: Option<u32>,

    pub silence_threshold: f32,
    pub noise_floor_db: f32,

    pub stft_window_size: usize,
    pub stft_hop_size: usize,
    pub neighborhood_size: usize,
    pub peak_threshold_db: f32,

    pub fan_value: usize,
    pub min_time_delta: i64,
    pub max_time_delta: i64,

    pub min_match_confidence: f64,
    pub min_absolute_matches: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("catalog.sqlite3"),
            music_library: PathBuf::from("."),

            buffer_size: 2048,
            sample_rate: 44100,
            target_sample_rate: 44100,
            audio_device_index: None,

            silence_threshold: 0.001,
            noise_floor_db: -60.0,

            stft_window_size: 2048,
            stft_hop_size: 512,
            neighborhood_size: 20,
            peak_threshold_db: -60.0,

            fan_value: 15,
            min_time_delta: 0,
            max_time_delta: 200,

            min_match_confidence: 0.1,
            min_absolute_matches: 5,
        }
    }
}

/// All-`Option` mirror of [`Config`], deserialized from an optional TOML file and merged
/// over the defaults. Unset fields simply keep whatever was there before.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub db_path: Option<PathBuf>,
    pub music_library: Option<PathBuf>,

    pub buffer_size: Option<usize>,
    pub sample_rate: Option<u32>,
    pub target_sample_rate: Option<u32>,
    pub audio_device_index: Option<u32>,

    pub silence_threshold: Option<f32>,
    pub noise_floor_db: Option<f32>,

    pub stft_window_size: Option<usize>,
    pub stft_hop_size: Option<usize>,
    pub neighborhood_size: Option<usize>,
    pub peak_threshold_db: Option<f32>,

    pub fan_value: Option<usize>,
    pub min_time_delta: Option<i64>,
    pub max_time_delta: Option<i64>,

    pub min_match_confidence: Option<f64>,
    pub min_absolute_matches: Option<usize>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CoreError::InvalidInput(format!("malformed config file {path:?}: {e}")))
    }

    /// Apply this file's overrides on top of `base`, returning the merged config.
    pub fn merge_onto(self, mut base: Config) -> Config {
        macro_rules! merge {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    base.$field = v;
                }
            };
        }
        merge!(db_path);
        merge!(music_library);
        merge!(buffer_size);
        merge!(sample_rate);
        merge!(target_sample_rate);
        merge!(noise_floor_db);
        merge!(silence_threshold);
        merge!(stft_window_size);
        merge!(stft_hop_size);
        merge!(neighborhood_size);
        merge!(peak_threshold_db);
        merge!(fan_value);
        merge!(min_time_delta);
        merge!(max_time_delta);
        merge!(min_match_confidence);
        merge!(min_absolute_matches);
        if self.audio_device_index.is_some() {
            base.audio_device_index = self.audio_device_index;
        }
        base
    }
}
