use crate::error::AppError;
use crate::sensor::DistanceSensor;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockReading {
    Distance(f64),
    Invalid,
}

/// Scripted sensor: replays queued readings, then repeats the fallback forever.
#[derive(Debug, Clone)]
pub struct MockDistanceSensor {
    script: VecDeque<MockReading>,
    fallback: MockReading,
    reads: usize,
}

impl MockDistanceSensor {
    pub fn constant(distance_cm: f64) -> Self {
        Self::scripted(Vec::new(), MockReading::Distance(distance_cm))
    }

    pub fn always_invalid() -> Self {
        Self::scripted(Vec::new(), MockReading::Invalid)
    }

    pub fn scripted(script: Vec<MockReading>, fallback: MockReading) -> Self {
        Self {
            script: script.into(),
            fallback,
            reads: 0,
        }
    }

    /// Replace the fallback reading, e.g. to simulate the tank filling between cycles.
    pub fn set_distance(&mut self, distance_cm: f64) {
        self.script.clear();
        self.fallback = MockReading::Distance(distance_cm);
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl DistanceSensor for MockDistanceSensor {
    fn read_raw_distance(&mut self) -> Result<f64, AppError> {
        self.reads += 1;
        match self.script.pop_front().unwrap_or(self.fallback) {
            MockReading::Distance(distance) => Ok(distance),
            MockReading::Invalid => Err(AppError::InvalidReading(
                "mock reading out of range".to_string(),
            )),
        }
    }
}
