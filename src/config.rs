use crate::activation::ActivationTiming;
use crate::audio::AudioSettings;
use crate::bus::relay::{RelayId, RelayPin};
use crate::display::canvas::Size;
use crate::display::fade::Easing;
use crate::display::layout::{LayoutOptions, Placement};
use crate::presentation::PresentationSettings;
use crate::presentation::phrases::DEFAULT_PHRASES_PATH;
use crate::proximity::{
    DEFAULT_DISTANCE_THRESHOLD_MM, DEFAULT_FAR_DISTANCE_MM, DEFAULT_SAMPLE_COUNT, SamplerSettings,
};
use crate::sensor::RangingMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_RELAY_ID: RelayId = 1;
pub const DEFAULT_DISPLAY_SIZE: Size = Size {
    width: 600,
    height: 400,
};
pub const DEFAULT_FONT_SCALES: [u32; 3] = [4, 5, 6];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub sensor: Option<SensorSection>,
    #[serde(default)]
    pub activation: Option<ActivationSection>,
    #[serde(default)]
    pub relays: Vec<RelayPin>,
    #[serde(default)]
    pub relay_bus: Option<RelayBusSection>,
    #[serde(default)]
    pub audio: Option<AudioSection>,
    #[serde(default)]
    pub presentation: Option<PresentationSection>,
    #[serde(default)]
    pub display: Option<DisplaySection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorSection {
    pub sample_count: Option<usize>,
    pub distance_threshold_mm: Option<u16>,
    pub sample_interval_ms: Option<u64>,
    pub ranging_mode: Option<RangingMode>,
    /// Distance reported for readings without a valid range status
    pub max_distance_mm: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ActivationSection {
    pub poll_interval_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub audio_lead_ms: Option<u64>,
    pub relay_lead_ms: Option<u64>,
    pub deactivate_delay_ms: Option<u64>,
    pub audio_fade_ms: Option<u64>,
    pub shutdown_audio_fade_ms: Option<u64>,
    /// Relay switched with the presentation (default: 1)
    pub relay_id: Option<RelayId>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayBusSection {
    pub active_high: Option<bool>,
    pub self_test: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AudioSection {
    pub dir: Option<PathBuf>,
    pub player: Option<String>,
    pub player_args: Option<Vec<String>>,
    pub mixer_control: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PresentationSection {
    pub phrases_path: Option<PathBuf>,
    pub fade_in_secs: Option<f64>,
    pub fade_out_secs: Option<f64>,
    pub stop_fade_secs: Option<f64>,
    pub hold_poll_ms: Option<u64>,
    pub margin: Option<f64>,
    pub line_spacing: Option<i32>,
    pub centered: Option<bool>,
    pub font_scales: Option<Vec<u32>>,
    pub easing: Option<Easing>,
    pub shuffle_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DisplaySection {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn secs(value: Option<f64>, default: Duration) -> Duration {
    value
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}

impl Config {
    pub fn sample_count(&self) -> usize {
        self.sensor
            .as_ref()
            .and_then(|s| s.sample_count)
            .unwrap_or(DEFAULT_SAMPLE_COUNT)
    }

    pub fn distance_threshold_mm(&self) -> u16 {
        self.sensor
            .as_ref()
            .and_then(|s| s.distance_threshold_mm)
            .unwrap_or(DEFAULT_DISTANCE_THRESHOLD_MM)
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        let defaults = SamplerSettings::default();
        let Some(sensor) = &self.sensor else {
            return defaults;
        };
        SamplerSettings {
            interval: millis(sensor.sample_interval_ms, defaults.interval),
            ranging_mode: sensor.ranging_mode.unwrap_or(defaults.ranging_mode),
            far_distance_mm: sensor.max_distance_mm.unwrap_or(DEFAULT_FAR_DISTANCE_MM),
        }
    }

    pub fn activation_timing(&self) -> ActivationTiming {
        let defaults = ActivationTiming::default();
        let Some(section) = &self.activation else {
            return defaults;
        };
        ActivationTiming {
            poll_interval: millis(section.poll_interval_ms, defaults.poll_interval),
            debounce: millis(section.debounce_ms, defaults.debounce),
            audio_lead: millis(section.audio_lead_ms, defaults.audio_lead),
            relay_lead: millis(section.relay_lead_ms, defaults.relay_lead),
            deactivate_delay: millis(section.deactivate_delay_ms, defaults.deactivate_delay),
            audio_fade: millis(section.audio_fade_ms, defaults.audio_fade),
            shutdown_audio_fade: millis(
                section.shutdown_audio_fade_ms,
                defaults.shutdown_audio_fade,
            ),
        }
    }

    pub fn relay_id(&self) -> RelayId {
        self.activation
            .as_ref()
            .and_then(|s| s.relay_id)
            .unwrap_or(DEFAULT_RELAY_ID)
    }

    /// Relays drive their load when the pin is high (default: true)
    pub fn relays_active_high(&self) -> bool {
        self.relay_bus
            .as_ref()
            .and_then(|s| s.active_high)
            .unwrap_or(true)
    }

    pub fn relay_self_test(&self) -> bool {
        self.relay_bus
            .as_ref()
            .and_then(|s| s.self_test)
            .unwrap_or(true)
    }

    pub fn audio_settings(&self) -> AudioSettings {
        let mut settings = AudioSettings::default();
        if let Some(audio) = self.audio.clone() {
            settings.dir = audio.dir.unwrap_or(settings.dir);
            settings.player = audio.player.unwrap_or(settings.player);
            settings.player_args = audio.player_args.unwrap_or(settings.player_args);
            settings.mixer_control = audio.mixer_control.unwrap_or(settings.mixer_control);
        }
        settings
    }

    /// Returns the phrase file path (default: data/phrases.json)
    pub fn phrases_path(&self) -> PathBuf {
        self.presentation
            .as_ref()
            .and_then(|s| s.phrases_path.clone())
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PHRASES_PATH))
    }

    pub fn presentation_settings(&self) -> PresentationSettings {
        let defaults = PresentationSettings::default();
        let Some(section) = &self.presentation else {
            return defaults;
        };
        let layout = LayoutOptions {
            margin: section.margin.unwrap_or(defaults.layout.margin),
            line_spacing: section.line_spacing.unwrap_or(defaults.layout.line_spacing),
            ..defaults.layout
        };
        let placement = match section.centered {
            Some(true) => Placement::Centered,
            Some(false) => Placement::Random,
            None => defaults.placement,
        };
        PresentationSettings {
            fade_in: secs(section.fade_in_secs, defaults.fade_in),
            fade_out: secs(section.fade_out_secs, defaults.fade_out),
            stop_fade: secs(section.stop_fade_secs, defaults.stop_fade),
            hold_poll: millis(section.hold_poll_ms, defaults.hold_poll),
            layout,
            placement,
            easing: section.easing.unwrap_or(defaults.easing),
            shuffle_seed: section.shuffle_seed,
            ..defaults
        }
    }

    /// Bitmap font scales to pick from per phrase; never empty.
    pub fn font_scales(&self) -> Vec<u32> {
        self.presentation
            .as_ref()
            .and_then(|s| s.font_scales.clone())
            .filter(|scales| !scales.is_empty())
            .unwrap_or_else(|| DEFAULT_FONT_SCALES.to_vec())
    }

    pub fn display_size(&self) -> Size {
        let display = self.display.clone().unwrap_or_default();
        Size::new(
            display.width.unwrap_or(DEFAULT_DISPLAY_SIZE.width),
            display.height.unwrap_or(DEFAULT_DISPLAY_SIZE.height),
        )
    }
}
