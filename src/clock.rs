//! Wall-clock access and the ISO-8601 representation used at the store boundary.
//!
//! Instants travel through the engine as [`OffsetDateTime`]; they are only
//! turned into strings when written to the store or returned by the API.

use crate::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to. Cloned handles share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Format as RFC 3339 in UTC with whole seconds, e.g. `2026-10-19T08:30:00Z`.
pub fn format_iso8601(instant: OffsetDateTime) -> Result<String, AppError> {
    let truncated = instant
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|err| AppError::Clock(err.to_string()))?;
    truncated
        .format(&Rfc3339)
        .map_err(|err| AppError::Clock(err.to_string()))
}

pub fn parse_iso8601(value: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| AppError::Clock(format!("{value:?}: {err}")))
}

/// `#[serde(with = "crate::clock::iso8601")]` for instants stored as ISO-8601 strings.
pub mod iso8601 {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(
        instant: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let formatted = super::format_iso8601(*instant).map_err(ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso8601(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_drops_subsecond_precision() -> Result<(), AppError> {
        let instant = OffsetDateTime::UNIX_EPOCH + Duration::from_millis(61_250);

        assert_eq!(format_iso8601(instant)?, "1970-01-01T00:01:01Z");
        Ok(())
    }

    #[test]
    fn parse_accepts_formatted_output() -> Result<(), AppError> {
        let instant = OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_760_000_000);

        let parsed = parse_iso8601(&format_iso8601(instant)?)?;

        assert_eq!(parsed, instant);
        Ok(())
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_iso8601("yesterday").unwrap_err();

        assert!(matches!(err, AppError::Clock(_)));
    }

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH);
        let handle = clock.clone();

        handle.advance(Duration::from_secs(125));

        assert_eq!(
            clock.now(),
            OffsetDateTime::UNIX_EPOCH + Duration::from_secs(125)
        );
    }
}
