//! Fail-soft snapshot of the remote device settings.
//!
//! Each field is read on its own. A missing field keeps its current value
//! silently; an unreadable or malformed one keeps it and is reported as a
//! fault. Paired fields (geometry, thresholds) are only replaced together and
//! only when the new pair is valid.

use crate::control::{Mode, Thresholds};
use crate::error::AppError;
use crate::estimation::TankGeometry;
use crate::store::{KeyValueStore, paths};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub geometry: TankGeometry,
    pub pump_flow_lpm: f64,
    pub mode: Mode,
    pub thresholds: Thresholds,
    pub notifications_enabled: bool,
    /// Pump start/stop notifications; muted by either this or `notifications_enabled`.
    pub pumping_alert: bool,
}

impl DeviceSettings {
    /// Settings as they are laid out under `/devices/{d}/settings`.
    pub fn to_value(&self) -> Value {
        json!({
            (paths::TANK_HEIGHT): self.geometry.tank_height(),
            (paths::SENSOR_TO_BOTTOM): self.geometry.sensor_to_bottom(),
            (paths::PUMP_FLOW_LPM): self.pump_flow_lpm,
            (paths::IS_AUTO_MODE): self.mode == Mode::Auto,
            (paths::MIN_WATER_LEVEL): self.thresholds.on(),
            (paths::MAX_WATER_LEVEL): self.thresholds.off(),
            (paths::NOTIFICATIONS_ENABLED): self.notifications_enabled,
            (paths::PUMPING_ALERT): self.pumping_alert,
        })
    }

    pub fn pump_notifications(&self) -> bool {
        self.notifications_enabled && self.pumping_alert
    }

    /// Pull every field from the store, returning the faults that made a
    /// field keep its previous value.
    pub fn refresh<K: KeyValueStore + ?Sized>(&mut self, store: &K, device: &str) -> Vec<AppError> {
        let mut faults = Vec::new();

        let tank_height = keep(
            read_field(store, device, paths::TANK_HEIGHT, Value::as_f64),
            &mut faults,
        )
        .unwrap_or(self.geometry.tank_height());
        let sensor_to_bottom = keep(
            read_field(store, device, paths::SENSOR_TO_BOTTOM, Value::as_f64),
            &mut faults,
        )
        .unwrap_or(self.geometry.sensor_to_bottom());
        if (tank_height, sensor_to_bottom)
            != (self.geometry.tank_height(), self.geometry.sensor_to_bottom())
        {
            match TankGeometry::new(tank_height, sensor_to_bottom) {
                Ok(geometry) => self.geometry = geometry,
                Err(err) => faults.push(err),
            }
        }

        if let Some(flow) = keep(
            read_field(store, device, paths::PUMP_FLOW_LPM, Value::as_f64),
            &mut faults,
        ) {
            if flow.is_finite() && flow > 0.0 {
                self.pump_flow_lpm = flow;
            } else {
                faults.push(AppError::InvalidSettings(format!(
                    "pump flow must be positive, got {flow}"
                )));
            }
        }

        if let Some(is_auto) = keep(
            read_field(store, device, paths::IS_AUTO_MODE, Value::as_bool),
            &mut faults,
        ) {
            self.mode = Mode::from_auto_flag(is_auto);
        }

        let on = keep(
            read_field(store, device, paths::MIN_WATER_LEVEL, as_level),
            &mut faults,
        )
        .unwrap_or(self.thresholds.on());
        let off = keep(
            read_field(store, device, paths::MAX_WATER_LEVEL, as_level),
            &mut faults,
        )
        .unwrap_or(self.thresholds.off());
        if (on, off) != (self.thresholds.on(), self.thresholds.off()) {
            match Thresholds::new(on, off) {
                Ok(thresholds) => self.thresholds = thresholds,
                Err(err) => faults.push(err),
            }
        }

        if let Some(enabled) = keep(
            read_field(store, device, paths::NOTIFICATIONS_ENABLED, Value::as_bool),
            &mut faults,
        ) {
            self.notifications_enabled = enabled;
        }

        if let Some(enabled) = keep(
            read_field(store, device, paths::PUMPING_ALERT, Value::as_bool),
            &mut faults,
        ) {
            self.pumping_alert = enabled;
        }

        faults
    }
}

pub fn as_level(value: &Value) -> Option<u8> {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|level| level.fract() == 0.0 && *level >= 0.0)
                .map(|level| level as u64)
        })
        .and_then(|level| u8::try_from(level).ok())
        .filter(|level| *level <= 100)
}

fn read_field<K, T>(
    store: &K,
    device: &str,
    field: &str,
    convert: fn(&Value) -> Option<T>,
) -> Result<Option<T>, AppError>
where
    K: KeyValueStore + ?Sized,
{
    let path = paths::setting(device, field);
    let value = store.get(&path).map_err(|err| AppError::ConfigRead {
        path: path.clone(),
        reason: err.to_string(),
    })?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => convert(&value).map(Some).ok_or_else(|| AppError::ConfigRead {
            path,
            reason: format!("unexpected value {value}"),
        }),
    }
}

fn keep<T>(result: Result<Option<T>, AppError>, faults: &mut Vec<AppError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            faults.push(err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use std::sync::{Arc, RwLock};

    fn defaults() -> DeviceSettings {
        DeviceSettings {
            geometry: TankGeometry::new(7.0, 14.05).expect("valid geometry"),
            pump_flow_lpm: 1.6,
            mode: Mode::Auto,
            thresholds: Thresholds::new(20, 90).expect("valid thresholds"),
            notifications_enabled: true,
            pumping_alert: true,
        }
    }

    fn store_with(settings: Value) -> Arc<RwLock<AppState>> {
        let store = Arc::new(RwLock::new(AppState::new()));
        store
            .set("/devices/device1/settings", settings)
            .expect("seed settings");
        store
    }

    #[test]
    fn refresh_applies_every_valid_field() {
        let store = store_with(json!({
            "tankHeight": 50.0,
            "sensorToBottom": 60,
            "pumpFlowLpm": 2.5,
            "isAutoMode": false,
            "minWaterLevel": 30,
            "maxWaterLevel": 80,
            "notificationsEnabled": false
        }));
        let mut settings = defaults();

        let faults = settings.refresh(&store, "device1");

        assert!(faults.is_empty(), "{faults:?}");
        assert_eq!(settings.geometry.tank_height(), 50.0);
        assert_eq!(settings.geometry.sensor_to_bottom(), 60.0);
        assert_eq!(settings.pump_flow_lpm, 2.5);
        assert_eq!(settings.mode, Mode::Manual);
        assert_eq!((settings.thresholds.on(), settings.thresholds.off()), (30, 80));
        assert!(!settings.notifications_enabled);
    }

    #[test]
    fn missing_fields_keep_previous_values_without_faults() {
        let store = store_with(json!({ "pumpFlowLpm": 3.0 }));
        let mut settings = defaults();

        let faults = settings.refresh(&store, "device1");

        assert!(faults.is_empty());
        assert_eq!(settings.pump_flow_lpm, 3.0);
        assert_eq!(settings.thresholds, defaults().thresholds);
    }

    #[test]
    fn malformed_field_keeps_previous_value_and_reports_fault() {
        let store = store_with(json!({
            "isAutoMode": "sometimes",
            "minWaterLevel": 10
        }));
        let mut settings = defaults();

        let faults = settings.refresh(&store, "device1");

        assert_eq!(faults.len(), 1);
        assert!(matches!(&faults[0], AppError::ConfigRead { path, .. }
            if path == "/devices/device1/settings/isAutoMode"));
        assert_eq!(settings.mode, Mode::Auto);
        assert_eq!(settings.thresholds.on(), 10);
    }

    #[test]
    fn inverted_thresholds_keep_previous_pair() {
        let store = store_with(json!({ "minWaterLevel": 95, "maxWaterLevel": 40 }));
        let mut settings = defaults();

        let faults = settings.refresh(&store, "device1");

        assert!(matches!(faults.as_slice(), [AppError::InvalidSettings(_)]));
        assert_eq!(settings.thresholds, defaults().thresholds);
    }

    #[test]
    fn sensor_below_full_line_keeps_previous_geometry() {
        let store = store_with(json!({ "tankHeight": 30.0, "sensorToBottom": 20.0 }));
        let mut settings = defaults();

        let faults = settings.refresh(&store, "device1");

        assert_eq!(faults.len(), 1);
        assert_eq!(settings.geometry, defaults().geometry);
    }

    #[test]
    fn levels_outside_percent_range_are_malformed() {
        assert_eq!(as_level(&json!(100)), Some(100));
        assert_eq!(as_level(&json!(20.0)), Some(20));
        assert_eq!(as_level(&json!(101)), None);
        assert_eq!(as_level(&json!(-1)), None);
        assert_eq!(as_level(&json!(12.5)), None);
    }

    #[test]
    fn to_value_uses_store_field_names() {
        let value = defaults().to_value();

        assert_eq!(value["isAutoMode"], json!(true));
        assert_eq!(value["minWaterLevel"], json!(20));
        assert_eq!(value["maxWaterLevel"], json!(90));
        assert_eq!(value["sensorToBottom"], json!(14.05));
        assert_eq!(value["pumpingAlert"], json!(true));
    }

    #[test]
    fn pumping_alert_mutes_pump_notifications_only() {
        let store = store_with(json!({ "pumpingAlert": false }));
        let mut settings = defaults();
        assert!(settings.pump_notifications());

        let faults = settings.refresh(&store, "device1");

        assert!(faults.is_empty(), "{faults:?}");
        assert!(settings.notifications_enabled);
        assert!(!settings.pumping_alert);
        assert!(!settings.pump_notifications());
    }
}
