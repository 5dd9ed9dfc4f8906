use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no valid reading in a batch of {attempts} samples")]
    NoValidReading { attempts: usize },
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("sensor error: {0}")]
    Sensor(String),
    #[error("config read failed for {path}: {reason}")]
    ConfigRead { path: String, reason: String },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("clock error: {0}")]
    Clock(String),
    #[error("telemetry write dropped: {0}")]
    TelemetryWrite(String),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("store snapshot failed for {path}: {reason}")]
    Snapshot { path: String, reason: String },
    #[error("state lock poisoned")]
    StateLock,
}
