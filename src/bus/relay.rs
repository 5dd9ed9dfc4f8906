//! Pump relay outputs.

use crate::error::AppError;
use std::sync::{Arc, Mutex};

/// Fire-and-forget pump switch; the hardware gives no acknowledgement.
pub trait PumpActuator {
    fn set_pump(&mut self, on: bool);
}

impl PumpActuator for Box<dyn PumpActuator + Send> {
    fn set_pump(&mut self, on: bool) {
        (**self).set_pump(on)
    }
}

#[cfg(target_os = "linux")]
pub struct RppalRelay {
    pin: rppal::gpio::OutputPin,
}

#[cfg(target_os = "linux")]
impl RppalRelay {
    /// Claim `pin` as an output, starting with the pump off.
    pub fn new(pin: u8) -> Result<Self, AppError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
        let output = gpio
            .get(pin)
            .map_err(|err| AppError::Gpio(err.to_string()))?
            .into_output_low();
        Ok(Self { pin: output })
    }
}

#[cfg(target_os = "linux")]
impl PumpActuator for RppalRelay {
    fn set_pump(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

/// Releasing the relay drives it low, so a dropped engine never leaves the pump running.
#[cfg(target_os = "linux")]
impl Drop for RppalRelay {
    fn drop(&mut self) {
        self.pin.set_low();
    }
}

#[cfg(not(target_os = "linux"))]
pub struct RppalRelay;

#[cfg(not(target_os = "linux"))]
impl RppalRelay {
    pub fn new(_pin: u8) -> Result<Self, AppError> {
        Err(AppError::Gpio(
            "GPIO relay requires Linux/Raspberry Pi".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl PumpActuator for RppalRelay {
    fn set_pump(&mut self, _on: bool) {}
}

/// In-memory relay. Clones share the same call log so tests can keep a handle
/// after moving the relay into the engine.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    calls: Arc<Mutex<Vec<bool>>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Last level driven onto the relay; `false` if never driven.
    pub fn is_on(&self) -> bool {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.last().copied())
            .unwrap_or(false)
    }
}

impl PumpActuator for MockRelay {
    fn set_pump(&mut self, on: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(on);
        }
    }
}
