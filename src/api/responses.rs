use crate::control::{Mode, PumpPhase};
use crate::events::NotificationKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidSettings,
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_phase: Option<PumpPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusResponse {
    pub is_pump_on: bool,
    pub water_level: u8,
    pub last_updated: String,
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SettingsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tank_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_to_bottom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_flow_lpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_auto_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_water_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_water_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pumping_alert: Option<bool>,
}

/// Partial settings update; absent fields are left as stored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SettingsPatch {
    pub tank_height: Option<f64>,
    pub sensor_to_bottom: Option<f64>,
    pub pump_flow_lpm: Option<f64>,
    pub is_auto_mode: Option<bool>,
    pub min_water_level: Option<u8>,
    pub max_water_level: Option<u8>,
    pub notifications_enabled: Option<bool>,
    pub pumping_alert: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandRequest {
    pub is_pump_on: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandResponse {
    pub is_pump_on: bool,
    pub timestamp: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EventResponse {
    pub id: String,
    pub start_pump: String,
    pub end_pump: String,
    pub mode: Mode,
    pub water_level: u8,
    pub duration_seconds: u64,
    pub amount_milliliters: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EventsResponse {
    pub events: Vec<EventResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DaySummary {
    pub date: String,
    pub total_milliliters: u64,
    pub events: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SummaryResponse {
    pub days: Vec<DaySummary>,
    pub total_milliliters: u64,
    pub max_day_milliliters: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct NotificationResponse {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_event: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationResponse>,
    pub unread: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ClearedResponse {
    pub removed: usize,
    pub timestamp: String,
}
