//! VL53L1X time-of-flight sensor mounted above the tank, looking down at the water surface.

use crate::error::AppError;
use crate::sensor::DistanceSensor;

#[cfg(target_os = "linux")]
use crate::sensor::millimetres_to_cm;
#[cfg(target_os = "linux")]
use rppal::i2c::I2c;
#[cfg(target_os = "linux")]
use tracing::info;
#[cfg(target_os = "linux")]
use vl53l1x_uld::{IOVoltage, RangeStatus, VL53L1X};

#[cfg(target_os = "linux")]
pub struct Vl53l1xSensor {
    driver: VL53L1X<I2c>,
}

#[cfg(target_os = "linux")]
impl Vl53l1xSensor {
    /// Open the sensor on the default I2C bus, initialise it and start continuous ranging.
    pub fn open(address: u8) -> Result<Self, AppError> {
        let i2c = I2c::new().map_err(|err| AppError::I2c(err.to_string()))?;
        let mut driver = VL53L1X::new(i2c, address);
        driver
            .init(IOVoltage::Volt2_8)
            .map_err(|err| AppError::Sensor(format!("init: {err:?}")))?;
        driver
            .get_sensor_id()
            .map_err(|err| AppError::Sensor(format!("verify: {err:?}")))?;
        driver
            .start_ranging()
            .map_err(|err| AppError::Sensor(format!("start_ranging: {err:?}")))?;
        info!(
            address = format_args!("{address:#04x}"),
            "VL53L1X ranging started"
        );
        Ok(Self { driver })
    }
}

#[cfg(target_os = "linux")]
impl DistanceSensor for Vl53l1xSensor {
    fn read_raw_distance(&mut self) -> Result<f64, AppError> {
        let result = self
            .driver
            .get_result()
            .map_err(|err| AppError::Sensor(format!("{err:?}")))?;
        // Clear interrupt to trigger next measurement
        self.driver
            .clear_interrupt()
            .map_err(|err| AppError::Sensor(format!("clear_interrupt: {err:?}")))?;

        if !matches!(result.status, RangeStatus::Valid) {
            return Err(AppError::InvalidReading(format!(
                "range status not valid: {:?}",
                result.status
            )));
        }
        millimetres_to_cm(result.distance_mm)
    }
}

#[cfg(not(target_os = "linux"))]
pub struct Vl53l1xSensor;

#[cfg(not(target_os = "linux"))]
impl Vl53l1xSensor {
    pub fn open(_address: u8) -> Result<Self, AppError> {
        Err(AppError::Sensor(
            "VL53L1X driver requires Linux/Raspberry Pi".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl DistanceSensor for Vl53l1xSensor {
    fn read_raw_distance(&mut self) -> Result<f64, AppError> {
        Err(AppError::Sensor(
            "VL53L1X driver requires Linux/Raspberry Pi".to_string(),
        ))
    }
}
