//! Deduplicated status publishing.

use crate::bus::telemetry::{TelemetrySink, TelemetryWrite};
use crate::store::paths;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedStatus {
    pub water_level: u8,
    pub is_pumping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub is_pump_on: bool,
    pub water_level: u8,
    #[serde(with = "crate::clock::iso8601")]
    pub last_updated: OffsetDateTime,
}

#[derive(Debug)]
pub struct StatusPublisher {
    device: String,
    last: Option<PublishedStatus>,
}

impl StatusPublisher {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            last: None,
        }
    }

    pub fn last(&self) -> Option<PublishedStatus> {
        self.last
    }

    /// Queue a status write when level or pump state moved since the last
    /// publish. The first call always writes.
    pub fn publish_if_changed(
        &mut self,
        level: u8,
        is_pumping: bool,
        now: OffsetDateTime,
        sink: &dyn TelemetrySink,
    ) -> Option<StatusUpdate> {
        let current = PublishedStatus {
            water_level: level,
            is_pumping,
        };
        if self.last == Some(current) {
            return None;
        }

        let update = StatusUpdate {
            is_pump_on: is_pumping,
            water_level: level,
            last_updated: now,
        };
        let write = match serde_json::to_value(&update) {
            Ok(value) => TelemetryWrite::merge(paths::status(&self.device), value),
            Err(err) => {
                warn!(error = %err, "Failed to encode status update");
                return None;
            }
        };
        if !sink.submit(write) {
            return None;
        }
        self.last = Some(current);
        debug!(level, is_pumping, "Status published");
        Some(update)
    }
}
