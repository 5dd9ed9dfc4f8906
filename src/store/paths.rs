//! Key paths of the device tree.

pub const TANK_HEIGHT: &str = "tankHeight";
pub const SENSOR_TO_BOTTOM: &str = "sensorToBottom";
pub const PUMP_FLOW_LPM: &str = "pumpFlowLpm";
pub const IS_AUTO_MODE: &str = "isAutoMode";
pub const MIN_WATER_LEVEL: &str = "minWaterLevel";
pub const MAX_WATER_LEVEL: &str = "maxWaterLevel";
pub const NOTIFICATIONS_ENABLED: &str = "notificationsEnabled";
pub const PUMPING_ALERT: &str = "pumpingAlert";

pub fn settings(device: &str) -> String {
    format!("/devices/{device}/settings")
}

pub fn setting(device: &str, field: &str) -> String {
    format!("/devices/{device}/settings/{field}")
}

pub fn status(device: &str) -> String {
    format!("/devices/{device}/status")
}

pub fn command(device: &str) -> String {
    format!("/devices/{device}/command/isPumpOn")
}

pub fn events(device: &str) -> String {
    format!("/history/{device}/events")
}

pub fn event(device: &str, key: &str) -> String {
    format!("/history/{device}/events/{key}")
}

pub fn notifications(device: &str) -> String {
    format!("/notifications/{device}")
}

pub fn notification(device: &str, id: &str) -> String {
    format!("/notifications/{device}/{id}")
}
