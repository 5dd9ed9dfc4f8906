use crate::error::AppError;

pub mod mock;
pub mod sampler;
pub mod vl53l1x;

// VL53L1X default is 0x52 in 8-bit notation; use 0x29 for 7-bit addressing.
pub const DEFAULT_I2C_ADDRESS_7BIT: u8 = 0x29;
pub const MIN_DISTANCE_MM: u16 = 40;
pub const MAX_DISTANCE_MM: u16 = 4000;

/// A single raw air-gap measurement source, in centimetres.
pub trait DistanceSensor {
    /// Fails with [`AppError::InvalidReading`] when the hardware reports an
    /// out-of-range or otherwise unusable sample.
    fn read_raw_distance(&mut self) -> Result<f64, AppError>;
}

impl DistanceSensor for Box<dyn DistanceSensor + Send> {
    fn read_raw_distance(&mut self) -> Result<f64, AppError> {
        (**self).read_raw_distance()
    }
}

/// Validate a millimetre reading against the sensor window and convert it to centimetres.
pub fn millimetres_to_cm(distance_mm: u16) -> Result<f64, AppError> {
    if !(MIN_DISTANCE_MM..=MAX_DISTANCE_MM).contains(&distance_mm) {
        return Err(AppError::InvalidReading(format!(
            "distance out of range: {distance_mm}mm (expected {MIN_DISTANCE_MM}-{MAX_DISTANCE_MM})"
        )));
    }
    Ok(f64::from(distance_mm) / 10.0)
}
