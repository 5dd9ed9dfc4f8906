//! Distance smoothing and fill-level estimation.

use crate::error::AppError;

pub mod filter;

use filter::SmoothingFilter;

/// Tank dimensions in centimetres, measured from the sensor face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankGeometry {
    tank_height: f64,
    sensor_to_bottom: f64,
}

impl TankGeometry {
    /// The sensor must sit at or above the full-tank line.
    pub fn new(tank_height: f64, sensor_to_bottom: f64) -> Result<Self, AppError> {
        if !(tank_height.is_finite() && tank_height > 0.0) {
            return Err(AppError::InvalidSettings(format!(
                "tank height must be positive, got {tank_height}"
            )));
        }
        if !(sensor_to_bottom.is_finite() && sensor_to_bottom > 0.0) {
            return Err(AppError::InvalidSettings(format!(
                "sensor to bottom must be positive, got {sensor_to_bottom}"
            )));
        }
        if sensor_to_bottom < tank_height {
            return Err(AppError::InvalidSettings(format!(
                "sensor to bottom ({sensor_to_bottom}) is below the tank height ({tank_height})"
            )));
        }
        Ok(Self {
            tank_height,
            sensor_to_bottom,
        })
    }

    pub fn tank_height(&self) -> f64 {
        self.tank_height
    }

    pub fn sensor_to_bottom(&self) -> f64 {
        self.sensor_to_bottom
    }
}

/// Fill percentage in [0, 100] for a filtered air-gap distance.
pub fn to_percent(filtered_distance: f64, geometry: &TankGeometry) -> u8 {
    if !filtered_distance.is_finite() {
        return 0;
    }
    let water_height =
        (geometry.sensor_to_bottom - filtered_distance).clamp(0.0, geometry.tank_height);
    (100.0 * water_height / geometry.tank_height).round() as u8
}

#[derive(Debug)]
pub struct LevelEstimator {
    filter: SmoothingFilter,
}

impl LevelEstimator {
    pub fn new(filter: SmoothingFilter) -> Self {
        Self { filter }
    }

    pub fn smooth(&mut self, raw: f64) -> f64 {
        self.filter.apply(raw)
    }

    /// Smooth a sampled distance and convert it in one step.
    pub fn estimate(&mut self, raw: f64, geometry: &TankGeometry) -> (f64, u8) {
        let filtered = self.smooth(raw);
        (filtered, to_percent(filtered, geometry))
    }
}
