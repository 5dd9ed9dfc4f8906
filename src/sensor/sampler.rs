use crate::error::AppError;
use crate::sensor::DistanceSensor;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_SAMPLES_PER_READING: usize = 10;
pub const DEFAULT_PACING: Duration = Duration::from_millis(50);

/// Collapses a burst of raw sensor reads into one distance per control cycle.
#[derive(Debug)]
pub struct DistanceSampler<S> {
    sensor: S,
    samples: usize,
    pacing: Duration,
}

impl<S: DistanceSensor> DistanceSampler<S> {
    pub fn new(sensor: S, samples: usize, pacing: Duration) -> Self {
        Self {
            sensor,
            samples: samples.max(1),
            pacing,
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// Average of the valid readings in one batch.
    ///
    /// Errors and non-positive or non-finite samples are dropped; the mean is
    /// taken over the survivors only.
    pub fn sample(&mut self) -> Result<f64, AppError> {
        let mut sum = 0.0;
        let mut valid = 0usize;

        for index in 0..self.samples {
            match self.sensor.read_raw_distance() {
                Ok(distance) if distance.is_finite() && distance > 0.0 => {
                    sum += distance;
                    valid += 1;
                }
                Ok(distance) => debug!(distance, "Discarding non-positive raw distance"),
                Err(err) => debug!(error = %err, "Discarding failed raw read"),
            }
            if !self.pacing.is_zero() && index + 1 < self.samples {
                std::thread::sleep(self.pacing);
            }
        }

        if valid == 0 {
            return Err(AppError::NoValidReading {
                attempts: self.samples,
            });
        }
        Ok(sum / valid as f64)
    }
}
