use crate::defaults;
use crate::error::{Result, SttError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub segmenter: SegmenterConfig,
    pub interim: InterimConfig,
    pub scheduler: SchedulerConfig,
    pub backpressure: BackpressureConfig,
    pub decode: DecodeConfig,
    pub logging: LoggingConfig,
}

/// Inbound audio configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub max_buffer_seconds: f32,
    pub vad_threshold: f32,
}

/// Utterance finalization configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub final_silence_ms_min: u32,
    pub final_silence_ms_max: u32,
    pub long_utterance_ms: u32,
}

/// Interim pass configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterimConfig {
    pub cooldown_ms: u64,
    pub tail_seconds: f32,
}

/// Worker pool and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub tick_ms: u64,
    pub stop_drain_timeout_ms: u64,
    pub session_channel_capacity: usize,
}

/// Backpressure watermarks and throttling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    pub final_hi: usize,
    pub final_crit: usize,
    pub interim_hi: usize,
    pub interim_crit: usize,
    pub backoff_factor: f32,
    pub hysteresis_ticks: u32,
}

/// Decode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecodeConfig {
    pub language: String,
    /// Retry a failed FINAL once with the reduced profile.
    pub final_retry: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            max_buffer_seconds: defaults::MAX_BUFFER_SECONDS,
            vad_threshold: defaults::VAD_THRESHOLD,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            final_silence_ms_min: defaults::FINAL_SILENCE_MS_MIN,
            final_silence_ms_max: defaults::FINAL_SILENCE_MS_MAX,
            long_utterance_ms: defaults::LONG_UTTERANCE_MS,
        }
    }
}

impl Default for InterimConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: defaults::INTERIM_COOLDOWN_MS,
            tail_seconds: defaults::TAIL_SECONDS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            tick_ms: defaults::SCHEDULER_TICK_MS,
            stop_drain_timeout_ms: defaults::STOP_DRAIN_TIMEOUT_MS,
            session_channel_capacity: defaults::SESSION_CHANNEL_CAPACITY,
        }
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            final_hi: defaults::FINAL_HI,
            final_crit: defaults::FINAL_CRIT,
            interim_hi: defaults::INTERIM_HI,
            interim_crit: defaults::INTERIM_CRIT,
            backoff_factor: defaults::BACKOFF_FACTOR,
            hysteresis_ticks: defaults::HYSTERESIS_TICKS,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            final_retry: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormat::Text,
        }
    }
}

impl InterimConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stop_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_drain_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SttError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SttError::Io(e)
            }
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SttError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SttError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DUALSTT_LANGUAGE → decode.language
    /// - DUALSTT_WORKERS → scheduler.workers
    /// - DUALSTT_INTERIM_COOLDOWN_MS → interim.cooldown_ms
    /// - DUALSTT_TAIL_SECONDS → interim.tail_seconds
    /// - DUALSTT_LOG_LEVEL → logging.level
    /// - DUALSTT_LOG_FORMAT → logging.format (text|json)
    ///
    /// Unparseable numeric values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("DUALSTT_LANGUAGE")
            && !language.is_empty()
        {
            self.decode.language = language;
        }

        if let Ok(workers) = std::env::var("DUALSTT_WORKERS")
            && let Ok(workers) = workers.parse()
        {
            self.scheduler.workers = workers;
        }

        if let Ok(cooldown) = std::env::var("DUALSTT_INTERIM_COOLDOWN_MS")
            && let Ok(cooldown) = cooldown.parse()
        {
            self.interim.cooldown_ms = cooldown;
        }

        if let Ok(tail) = std::env::var("DUALSTT_TAIL_SECONDS")
            && let Ok(tail) = tail.parse()
        {
            self.interim.tail_seconds = tail;
        }

        if let Ok(level) = std::env::var("DUALSTT_LOG_LEVEL")
            && !level.is_empty()
        {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("DUALSTT_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }

        self
    }

    /// Check every value against its accepted range.
    pub fn validate(&self) -> Result<()> {
        let (cooldown_min, cooldown_max) = defaults::INTERIM_COOLDOWN_RANGE_MS;
        if !(cooldown_min..=cooldown_max).contains(&self.interim.cooldown_ms) {
            return Err(invalid(
                "interim.cooldown_ms",
                format!("must be between {cooldown_min} and {cooldown_max}"),
            ));
        }

        let (tail_min, tail_max) = defaults::TAIL_SECONDS_RANGE;
        if !(tail_min..=tail_max).contains(&self.interim.tail_seconds) {
            return Err(invalid(
                "interim.tail_seconds",
                format!("must be between {tail_min} and {tail_max}"),
            ));
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if !(10..=60).contains(&self.audio.frame_ms) {
            return Err(invalid("audio.frame_ms", "must be between 10 and 60"));
        }
        if self.audio.max_buffer_seconds < self.interim.tail_seconds {
            return Err(invalid(
                "audio.max_buffer_seconds",
                "must be at least interim.tail_seconds",
            ));
        }

        if self.segmenter.final_silence_ms_min > self.segmenter.final_silence_ms_max {
            return Err(invalid(
                "segmenter.final_silence_ms_min",
                "must not exceed final_silence_ms_max",
            ));
        }
        if self.segmenter.long_utterance_ms == 0 {
            return Err(invalid("segmenter.long_utterance_ms", "must be positive"));
        }

        if self.scheduler.workers == 0 {
            return Err(invalid("scheduler.workers", "must be at least 1"));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(invalid("scheduler.tick_ms", "must be positive"));
        }
        if self.scheduler.session_channel_capacity == 0 {
            return Err(invalid(
                "scheduler.session_channel_capacity",
                "must be positive",
            ));
        }

        let bp = &self.backpressure;
        if bp.final_hi > bp.final_crit {
            return Err(invalid(
                "backpressure.final_hi",
                "must not exceed final_crit",
            ));
        }
        if bp.interim_hi > bp.interim_crit {
            return Err(invalid(
                "backpressure.interim_hi",
                "must not exceed interim_crit",
            ));
        }
        if bp.backoff_factor < 1.0 {
            return Err(invalid("backpressure.backoff_factor", "must be >= 1.0"));
        }
        if bp.hysteresis_ticks == 0 {
            return Err(invalid("backpressure.hysteresis_ticks", "must be at least 1"));
        }

        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/dualstt/config.toml on Linux, or a relative
    /// `dualstt.toml` when no config directory is known.
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("dualstt").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("dualstt.toml"))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SttError::Other(e.to_string()))
    }
}

fn invalid(key: &str, message: impl Into<String>) -> SttError {
    SttError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
