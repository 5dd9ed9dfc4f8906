//! Pump events and user notifications derived from controller transitions.

use crate::bus::telemetry::{TelemetrySink, TelemetryWrite};
use crate::control::{Mode, PumpSession, Transition};
use crate::store::paths;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Level points added to the stop message for auto runs (auto stops early).
pub const AUTO_STOP_DISPLAY_MARGIN: u8 = 3;
/// Level points added to the stop message for manual runs.
pub const MANUAL_STOP_DISPLAY_MARGIN: u8 = 2;

/// Mints `{prefix}_{unix_ms}` keys that never repeat, even if the clock stalls
/// or steps back.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: &'static str,
    last_ms: Option<i128>,
}

impl KeyGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            last_ms: None,
        }
    }

    pub fn next(&mut self, now: OffsetDateTime) -> String {
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        let value = match self.last_ms {
            Some(last) if millis <= last => last + 1,
            _ => millis,
        };
        self.last_ms = Some(value);
        format!("{}_{}", self.prefix, value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip)]
    pub key: String,
    #[serde(with = "crate::clock::iso8601")]
    pub start_pump: OffsetDateTime,
    #[serde(with = "crate::clock::iso8601")]
    pub end_pump: OffsetDateTime,
    pub mode: Mode,
    pub water_level: u8,
    #[serde(rename = "duration")]
    pub duration_seconds: u64,
    pub amount_milliliters: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(with = "crate::clock::iso8601")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event: Option<String>,
}

impl Notification {
    pub fn new(
        id: String,
        title: &str,
        message: String,
        timestamp: OffsetDateTime,
        kind: NotificationKind,
        related_event: Option<String>,
    ) -> Self {
        Self {
            id,
            title: title.to_string(),
            message,
            timestamp,
            kind,
            read: false,
            related_event,
        }
    }
}

/// Whole seconds between start and stop plus whether the clock went backwards.
/// Both instants are truncated to the second first, matching the stored timestamps.
pub fn session_duration(started_at: OffsetDateTime, stopped_at: OffsetDateTime) -> (u64, bool) {
    let seconds = stopped_at.unix_timestamp() - started_at.unix_timestamp();
    if seconds < 0 {
        (0, true)
    } else {
        (seconds as u64, false)
    }
}

/// Pumped volume in millilitres for a run of `duration_seconds` at `flow_lpm`.
pub fn pumped_milliliters(flow_lpm: f64, duration_seconds: u64) -> u64 {
    if !flow_lpm.is_finite() || flow_lpm <= 0.0 {
        return 0;
    }
    (flow_lpm * duration_seconds as f64 / 60.0 * 1000.0).round() as u64
}

#[derive(Debug)]
pub struct EventRecorder {
    device: String,
    notification_keys: KeyGenerator,
}

impl EventRecorder {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            notification_keys: KeyGenerator::new("ntf"),
        }
    }

    pub fn record(
        &self,
        session: &PumpSession,
        stopped_at: OffsetDateTime,
        level_at_stop: u8,
        flow_lpm: f64,
    ) -> Event {
        let (duration_seconds, degraded) = session_duration(session.started_at, stopped_at);
        if degraded {
            warn!(
                event_key = %session.event_key,
                started_at = %session.started_at,
                stopped_at = %stopped_at,
                "Pump stopped before it started, recording zero duration"
            );
        }
        Event {
            key: session.event_key.clone(),
            start_pump: session.started_at,
            end_pump: stopped_at,
            mode: session.mode,
            water_level: level_at_stop,
            duration_seconds,
            amount_milliliters: pumped_milliliters(flow_lpm, duration_seconds),
            degraded,
        }
    }

    pub fn start_notification(
        &mut self,
        mode: Mode,
        level: u8,
        threshold_on: u8,
        event_key: &str,
        at: OffsetDateTime,
    ) -> Notification {
        let message = match mode {
            Mode::Auto => format!("Water level dropped below {threshold_on}%"),
            Mode::Manual => format!("Pump switched on manually at {level}%"),
        };
        Notification::new(
            self.notification_keys.next(at),
            "Pump started",
            message,
            at,
            NotificationKind::Info,
            Some(event_key.to_string()),
        )
    }

    pub fn stop_notification(&mut self, event: &Event) -> Notification {
        let margin = match event.mode {
            Mode::Auto => AUTO_STOP_DISPLAY_MARGIN,
            Mode::Manual => MANUAL_STOP_DISPLAY_MARGIN,
        };
        let shown = event.water_level.saturating_add(margin).min(100);
        Notification::new(
            self.notification_keys.next(event.end_pump),
            "Pump stopped",
            format!("Water level rose to {shown}%"),
            event.end_pump,
            NotificationKind::Success,
            Some(event.key.clone()),
        )
    }

    /// Enqueue the event and notifications for one transition. Returns the
    /// event when the transition closed a session.
    pub fn emit(
        &mut self,
        transition: &Transition,
        flow_lpm: f64,
        notify: bool,
        sink: &dyn TelemetrySink,
    ) -> Option<Event> {
        match transition {
            Transition::Started {
                mode,
                level,
                threshold_on,
                event_key,
                at,
            } => {
                if notify {
                    let notification =
                        self.start_notification(*mode, *level, *threshold_on, event_key, *at);
                    self.submit_notification(&notification, sink);
                }
                None
            }
            Transition::Stopped { session, level, at } => {
                let event = self.record(session, *at, *level, flow_lpm);
                match TelemetryWrite::set_serialized(paths::event(&self.device, &event.key), &event)
                {
                    Ok(write) => {
                        sink.submit(write);
                    }
                    Err(err) => warn!(event_key = %event.key, error = %err, "Failed to encode event"),
                }
                if notify {
                    let notification = self.stop_notification(&event);
                    self.submit_notification(&notification, sink);
                }
                Some(event)
            }
        }
    }

    fn submit_notification(&self, notification: &Notification, sink: &dyn TelemetrySink) {
        let path = paths::notification(&self.device, &notification.id);
        match TelemetryWrite::set_serialized(path, notification) {
            Ok(write) => {
                debug!(id = %notification.id, title = %notification.title, "Queued notification");
                sink.submit(write);
            }
            Err(err) => warn!(id = %notification.id, error = %err, "Failed to encode notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::telemetry::MemorySink;
    use serde_json::json;
    use std::time::Duration;

    fn at(seconds: u64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_760_000_000 + seconds)
    }

    fn session(mode: Mode, started: u64) -> PumpSession {
        PumpSession {
            started_at: at(started),
            mode,
            event_key: "evt_1760000000000".to_string(),
        }
    }

    #[test]
    fn volume_follows_flow_and_duration() {
        let recorder = EventRecorder::new("device1");

        let event = recorder.record(&session(Mode::Auto, 0), at(125), 87, 1.6);

        assert_eq!(event.duration_seconds, 125);
        assert_eq!(event.amount_milliliters, 3333);
        assert!(!event.degraded);
    }

    #[test]
    fn duration_agrees_with_stored_timestamps() -> Result<(), Box<dyn std::error::Error>> {
        let recorder = EventRecorder::new("device1");
        let mut started = session(Mode::Auto, 0);
        started.started_at += Duration::from_millis(900);
        let stopped_at = started.started_at + Duration::from_millis(124_200);

        let event = recorder.record(&started, stopped_at, 87, 1.6);

        let value = serde_json::to_value(&event)?;
        let start = crate::clock::parse_iso8601(value["startPump"].as_str().ok_or("startPump")?)?;
        let end = crate::clock::parse_iso8601(value["endPump"].as_str().ok_or("endPump")?)?;
        assert_eq!((end - start).whole_seconds(), 125);
        assert_eq!(event.duration_seconds, 125);
        assert_eq!(event.amount_milliliters, 3333);
        Ok(())
    }

    #[test]
    fn clock_skew_yields_zero_duration_and_degraded_event() {
        let recorder = EventRecorder::new("device1");

        let event = recorder.record(&session(Mode::Manual, 100), at(40), 50, 1.6);

        assert_eq!(event.duration_seconds, 0);
        assert_eq!(event.amount_milliliters, 0);
        assert!(event.degraded);
    }

    #[test]
    fn bad_flow_counts_as_no_volume() {
        assert_eq!(pumped_milliliters(-1.0, 60), 0);
        assert_eq!(pumped_milliliters(f64::NAN, 60), 0);
        assert_eq!(pumped_milliliters(2.0, 30), 1000);
    }

    #[test]
    fn key_generator_never_repeats() {
        let mut keys = KeyGenerator::new("evt");

        let first = keys.next(at(0));
        let second = keys.next(at(0));
        let third = keys.next(at(0) - Duration::from_secs(5));

        assert_eq!(first, "evt_1760000000000");
        assert_eq!(second, "evt_1760000000001");
        assert_eq!(third, "evt_1760000000002");
    }

    #[test]
    fn notification_texts_follow_mode() {
        let mut recorder = EventRecorder::new("device1");

        let auto = recorder.start_notification(Mode::Auto, 12, 20, "evt_1", at(0));
        let manual = recorder.start_notification(Mode::Manual, 64, 20, "evt_2", at(1));

        assert_eq!(auto.title, "Pump started");
        assert_eq!(auto.message, "Water level dropped below 20%");
        assert_eq!(manual.message, "Pump switched on manually at 64%");
        assert_eq!(manual.kind, NotificationKind::Info);
        assert!(!manual.read);
    }

    #[test]
    fn stop_message_adds_mode_margin_and_caps_at_full() {
        let mut recorder = EventRecorder::new("device1");
        let auto = recorder.record(&session(Mode::Auto, 0), at(60), 87, 1.6);
        let manual = recorder.record(&session(Mode::Manual, 0), at(60), 99, 1.6);

        let auto_note = recorder.stop_notification(&auto);
        let manual_note = recorder.stop_notification(&manual);

        assert_eq!(auto_note.message, "Water level rose to 90%");
        assert_eq!(manual_note.message, "Water level rose to 100%");
        assert_eq!(auto_note.kind, NotificationKind::Success);
        assert_eq!(auto_note.related_event.as_deref(), Some("evt_1760000000000"));
    }

    #[test]
    fn stop_transition_writes_event_under_session_key() {
        let mut recorder = EventRecorder::new("device1");
        let sink = MemorySink::new();
        let transition = Transition::Stopped {
            session: session(Mode::Auto, 0),
            level: 88,
            at: at(125),
        };

        let event = recorder.emit(&transition, 1.6, true, &sink);

        assert!(event.is_some());
        let events = sink.writes_under("/history/device1/events/");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "/history/device1/events/evt_1760000000000");
        assert_eq!(
            events[0].value,
            json!({
                "startPump": "2025-10-09T08:53:20Z",
                "endPump": "2025-10-09T08:55:25Z",
                "mode": "AUTO",
                "waterLevel": 88,
                "duration": 125,
                "amountMilliliters": 3333
            })
        );
        assert_eq!(sink.writes_under("/notifications/device1/").len(), 1);
    }

    #[test]
    fn disabled_notifications_still_record_events() {
        let mut recorder = EventRecorder::new("device1");
        let sink = MemorySink::new();
        let start = Transition::Started {
            mode: Mode::Auto,
            level: 10,
            threshold_on: 20,
            event_key: "evt_1".to_string(),
            at: at(0),
        };
        let stop = Transition::Stopped {
            session: session(Mode::Auto, 0),
            level: 88,
            at: at(30),
        };

        recorder.emit(&start, 1.6, false, &sink);
        recorder.emit(&stop, 1.6, false, &sink);

        assert!(sink.writes_under("/notifications/").is_empty());
        assert_eq!(sink.writes_under("/history/").len(), 1);
    }
}
