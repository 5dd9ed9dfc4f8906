use crate::bus::telemetry::DEFAULT_QUEUE_CAPACITY;
use crate::control::{Mode, Thresholds};
use crate::estimation::TankGeometry;
use crate::estimation::filter::FilterSettings;
use crate::sensor::DEFAULT_I2C_ADDRESS_7BIT;
use crate::sensor::sampler::{DEFAULT_PACING, DEFAULT_SAMPLES_PER_READING};
use crate::store::DeviceSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_DEVICE_ID: &str = "device1";
pub const DEFAULT_CYCLE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RELAY_PIN: u8 = 17;
pub const DEFAULT_STORE_PATH: &str = "data/store.json";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub device: Option<DeviceSection>,
    #[serde(default)]
    pub tank: Option<TankSection>,
    #[serde(default)]
    pub filter: Option<FilterSettings>,
    #[serde(default)]
    pub sampler: Option<SamplerSection>,
    #[serde(default)]
    pub control: Option<ControlSection>,
    #[serde(default)]
    pub hardware: Option<HardwareSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub store: Option<StoreSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSection {
    pub id: Option<String>,
}

/// Settings written to a fresh store and used until the remote side changes them.
#[derive(Debug, Deserialize, Clone)]
pub struct TankSection {
    #[serde(default = "default_tank_height")]
    pub tank_height_cm: f64,
    #[serde(default = "default_sensor_to_bottom")]
    pub sensor_to_bottom_cm: f64,
    #[serde(default = "default_pump_flow")]
    pub pump_flow_lpm: f64,
    #[serde(default = "default_true")]
    pub auto_mode: bool,
    #[serde(default = "default_min_level")]
    pub min_water_level: u8,
    #[serde(default = "default_max_level")]
    pub max_water_level: u8,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub pumping_alert: bool,
}

impl Default for TankSection {
    fn default() -> Self {
        Self {
            tank_height_cm: default_tank_height(),
            sensor_to_bottom_cm: default_sensor_to_bottom(),
            pump_flow_lpm: default_pump_flow(),
            auto_mode: true,
            min_water_level: default_min_level(),
            max_water_level: default_max_level(),
            notifications_enabled: true,
            pumping_alert: true,
        }
    }
}

fn default_tank_height() -> f64 {
    7.0
}

fn default_sensor_to_bottom() -> f64 {
    14.05
}

fn default_pump_flow() -> f64 {
    1.6
}

fn default_min_level() -> u8 {
    20
}

fn default_max_level() -> u8 {
    90
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplerSection {
    /// Raw reads averaged into one reading (default: 10)
    pub samples_per_reading: Option<usize>,
    /// Pause between raw reads in milliseconds (default: 50)
    pub pacing_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlSection {
    /// Control cycle period in milliseconds (default: 500)
    pub cycle_interval_ms: Option<u64>,
    /// Outbound telemetry queue capacity (default: 64)
    pub telemetry_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HardwareSection {
    /// Use in-memory sensor and relay instead of I2C/GPIO
    #[serde(default)]
    pub simulated: bool,
    /// Distance reported by the simulated sensor, in centimetres
    pub simulated_distance_cm: Option<f64>,
    /// 7-bit I2C address of the distance sensor (default: 0x29)
    pub sensor_address: Option<u8>,
    /// BCM GPIO pin driving the pump relay (default: 17)
    pub relay_pin: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSection {
    /// Snapshot file for the device tree; empty keeps the store in memory only
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn device_id(&self) -> &str {
        self.device
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_DEVICE_ID)
    }

    /// Returns the configured log level, falling back to INFO when unrecognised.
    pub fn log_level(&self) -> Level {
        self.logging.level.parse().unwrap_or(Level::INFO)
    }

    pub fn tank(&self) -> TankSection {
        self.tank.clone().unwrap_or_default()
    }

    /// Validated initial device settings from the [tank] section.
    pub fn initial_settings(&self) -> Result<DeviceSettings, ConfigError> {
        let tank = self.tank();
        let geometry = TankGeometry::new(tank.tank_height_cm, tank.sensor_to_bottom_cm)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        let thresholds = Thresholds::new(tank.min_water_level, tank.max_water_level)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if !(tank.pump_flow_lpm.is_finite() && tank.pump_flow_lpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pump_flow_lpm must be positive, got {}",
                tank.pump_flow_lpm
            )));
        }
        Ok(DeviceSettings {
            geometry,
            pump_flow_lpm: tank.pump_flow_lpm,
            mode: Mode::from_auto_flag(tank.auto_mode),
            thresholds,
            notifications_enabled: tank.notifications_enabled,
            pumping_alert: tank.pumping_alert,
        })
    }

    /// Returns the smoothing filter selection (default: moving average over 5)
    pub fn filter_settings(&self) -> FilterSettings {
        self.filter.clone().unwrap_or_default()
    }

    pub fn samples_per_reading(&self) -> usize {
        self.sampler
            .as_ref()
            .and_then(|s| s.samples_per_reading)
            .unwrap_or(DEFAULT_SAMPLES_PER_READING)
    }

    pub fn sample_pacing(&self) -> Duration {
        self.sampler
            .as_ref()
            .and_then(|s| s.pacing_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PACING)
    }

    pub fn cycle_interval(&self) -> Duration {
        let millis = self
            .control
            .as_ref()
            .and_then(|c| c.cycle_interval_ms)
            .unwrap_or(DEFAULT_CYCLE_INTERVAL_MS);
        Duration::from_millis(millis)
    }

    pub fn telemetry_queue_capacity(&self) -> usize {
        self.control
            .as_ref()
            .and_then(|c| c.telemetry_queue_capacity)
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn simulated_hardware(&self) -> bool {
        self.hardware.as_ref().is_some_and(|h| h.simulated)
    }

    /// Distance the simulated sensor reports; defaults to a half-full tank.
    pub fn simulated_distance_cm(&self) -> f64 {
        self.hardware
            .as_ref()
            .and_then(|h| h.simulated_distance_cm)
            .unwrap_or_else(|| {
                let tank = self.tank();
                tank.sensor_to_bottom_cm - tank.tank_height_cm / 2.0
            })
    }

    pub fn sensor_address(&self) -> u8 {
        self.hardware
            .as_ref()
            .and_then(|h| h.sensor_address)
            .unwrap_or(DEFAULT_I2C_ADDRESS_7BIT)
    }

    pub fn relay_pin(&self) -> u8 {
        self.hardware
            .as_ref()
            .and_then(|h| h.relay_pin)
            .unwrap_or(DEFAULT_RELAY_PIN)
    }

    /// Snapshot file for the store (default: data/store.json), `None` when
    /// persistence is switched off with an empty path.
    pub fn store_path(&self) -> Option<PathBuf> {
        let path = self
            .store
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .unwrap_or(DEFAULT_STORE_PATH);
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
