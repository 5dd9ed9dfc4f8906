//! Smoothing filters for the sampled distance.
//!
//! Exactly one filter is chosen from configuration at startup. Each variant
//! carries its own accumulator, which lives for the whole process.

use crate::error::AppError;
use serde::Deserialize;

pub const DEFAULT_WINDOW: usize = 5;
pub const DEFAULT_ALPHA: f64 = 0.2;
pub const DEFAULT_PROCESS_NOISE: f64 = 0.1;
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 0.5;
const KALMAN_INITIAL_ERROR: f64 = 1.0;

/// Filter selection as written in the `[filter]` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSettings {
    MovingAverage {
        #[serde(default = "default_window")]
        window: usize,
    },
    Ema {
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    Kalman {
        #[serde(default = "default_process_noise")]
        process_noise: f64,
        #[serde(default = "default_measurement_noise")]
        measurement_noise: f64,
    },
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::MovingAverage {
            window: DEFAULT_WINDOW,
        }
    }
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

fn default_process_noise() -> f64 {
    DEFAULT_PROCESS_NOISE
}

fn default_measurement_noise() -> f64 {
    DEFAULT_MEASUREMENT_NOISE
}

#[derive(Debug, Clone, PartialEq)]
pub enum SmoothingFilter {
    MovingAverage {
        window: usize,
        samples: Vec<f64>,
        next: usize,
    },
    Ema {
        alpha: f64,
        state: Option<f64>,
    },
    Kalman {
        process_noise: f64,
        measurement_noise: f64,
        estimate: Option<f64>,
        error: f64,
    },
}

impl SmoothingFilter {
    pub fn moving_average(window: usize) -> Result<Self, AppError> {
        if window == 0 {
            return Err(AppError::InvalidSettings(
                "moving average window must be at least 1".to_string(),
            ));
        }
        Ok(Self::MovingAverage {
            window,
            samples: Vec::with_capacity(window),
            next: 0,
        })
    }

    pub fn ema(alpha: f64) -> Result<Self, AppError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(AppError::InvalidSettings(format!(
                "ema alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self::Ema { alpha, state: None })
    }

    pub fn kalman(process_noise: f64, measurement_noise: f64) -> Result<Self, AppError> {
        if !(process_noise > 0.0 && process_noise.is_finite())
            || !(measurement_noise > 0.0 && measurement_noise.is_finite())
        {
            return Err(AppError::InvalidSettings(format!(
                "kalman noise must be positive, got q={process_noise} r={measurement_noise}"
            )));
        }
        Ok(Self::Kalman {
            process_noise,
            measurement_noise,
            estimate: None,
            error: KALMAN_INITIAL_ERROR,
        })
    }

    pub fn from_settings(settings: &FilterSettings) -> Result<Self, AppError> {
        match *settings {
            FilterSettings::MovingAverage { window } => Self::moving_average(window),
            FilterSettings::Ema { alpha } => Self::ema(alpha),
            FilterSettings::Kalman {
                process_noise,
                measurement_noise,
            } => Self::kalman(process_noise, measurement_noise),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MovingAverage { .. } => "moving_average",
            Self::Ema { .. } => "ema",
            Self::Kalman { .. } => "kalman",
        }
    }

    /// Feed one distance and return the filtered value.
    pub fn apply(&mut self, raw: f64) -> f64 {
        match self {
            Self::MovingAverage {
                window,
                samples,
                next,
            } => {
                if samples.len() < *window {
                    samples.push(raw);
                } else {
                    samples[*next] = raw;
                }
                *next = (*next + 1) % *window;
                samples.iter().sum::<f64>() / samples.len() as f64
            }
            Self::Ema { alpha, state } => {
                let value = match *state {
                    Some(previous) => previous + *alpha * (raw - previous),
                    None => raw,
                };
                *state = Some(value);
                value
            }
            Self::Kalman {
                process_noise,
                measurement_noise,
                estimate,
                error,
            } => {
                let Some(current) = *estimate else {
                    *estimate = Some(raw);
                    return raw;
                };
                *error += *process_noise;
                let gain = *error / (*error + *measurement_noise);
                let updated = current + gain * (raw - current);
                *error *= 1.0 - gain;
                *estimate = Some(updated);
                updated
            }
        }
    }
}
