use crate::api::responses::{
    ClearedResponse, CommandRequest, CommandResponse, DaySummary, ErrorCode, ErrorResponse,
    EventResponse, EventsQuery, EventsResponse, HealthStatus, HealthSuccessResponse,
    NotificationResponse, NotificationsResponse, SettingsPatch, SettingsResponse, StatusResponse,
    SummaryResponse,
};
use crate::clock::{Clock, SystemClock, format_iso8601};
use crate::control::Thresholds;
use crate::error::AppError;
use crate::estimation::TankGeometry;
use crate::events::{Event, Notification};
use crate::state::AppState;
use crate::status::StatusUpdate;
use crate::store::paths;
use crate::store::settings::as_level;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use tracing::{error, info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
pub const DEFAULT_EVENTS_LIMIT: usize = 20;

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        ApiResponse::Success {
            status: StatusCode::OK,
            body,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

type SharedState = State<Arc<RwLock<AppState>>>;

pub async fn get_health(State(state): SharedState) -> impl IntoResponse {
    build_health_response(state, SystemClock.now())
}

pub async fn get_status(State(state): SharedState, Path(device): Path<String>) -> impl IntoResponse {
    build_status_response(state, &device, SystemClock.now())
}

pub async fn get_settings(
    State(state): SharedState,
    Path(device): Path<String>,
) -> impl IntoResponse {
    build_settings_response(state, &device, SystemClock.now())
}

pub async fn patch_settings(
    State(state): SharedState,
    Path(device): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    build_settings_patch_response(state, &device, patch, SystemClock.now())
}

pub async fn put_command(
    State(state): SharedState,
    Path(device): Path<String>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    build_command_response(state, &device, request, SystemClock.now())
}

pub async fn get_events(
    State(state): SharedState,
    Path(device): Path<String>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    build_events_response(state, &device, query.limit, SystemClock.now())
}

pub async fn get_summary(
    State(state): SharedState,
    Path(device): Path<String>,
) -> impl IntoResponse {
    build_summary_response(state, &device, SystemClock.now())
}

pub async fn get_notifications(
    State(state): SharedState,
    Path(device): Path<String>,
) -> impl IntoResponse {
    build_notifications_response(state, &device, SystemClock.now())
}

pub async fn post_notification_read(
    State(state): SharedState,
    Path((device, id)): Path<(String, String)>,
) -> impl IntoResponse {
    build_mark_read_response(state, &device, &id, SystemClock.now())
}

pub async fn delete_notifications(
    State(state): SharedState,
    Path(device): Path<String>,
) -> impl IntoResponse {
    build_clear_notifications_response(state, &device, SystemClock.now())
}

fn build_health_response(
    state: Arc<RwLock<AppState>>,
    now: OffsetDateTime,
) -> ApiResponse<HealthSuccessResponse> {
    let report = match state.read() {
        Ok(guard) => guard.last_cycle().cloned(),
        Err(_) => return internal_error("state lock poisoned while reading last cycle", now),
    };

    let Some(report) = report else {
        return ApiResponse::Success {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: HealthSuccessResponse {
                status: HealthStatus::Ko,
                water_level: None,
                pump_phase: None,
                last_cycle: None,
                timestamp: format_timestamp(now),
            },
        };
    };

    let status = if report.sensor_fault || report.settings_faults > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };
    ApiResponse::ok(HealthSuccessResponse {
        status,
        water_level: report.level,
        pump_phase: Some(report.phase),
        last_cycle: Some(format_timestamp(report.timestamp)),
        timestamp: format_timestamp(now),
    })
}

fn build_status_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    now: OffsetDateTime,
) -> ApiResponse<StatusResponse> {
    let stored = match state.read() {
        Ok(guard) => guard.get(&paths::status(device)).cloned(),
        Err(_) => return internal_error("state lock poisoned while reading status", now),
    };
    let Some(stored) = stored else {
        return not_found(format!("No status for device {device}"), now);
    };

    match serde_json::from_value::<StatusUpdate>(stored) {
        Ok(status) => ApiResponse::ok(StatusResponse {
            is_pump_on: status.is_pump_on,
            water_level: status.water_level,
            last_updated: format_timestamp(status.last_updated),
        }),
        Err(err) => {
            warn!(device, error = %err, "Stored status is malformed");
            internal_error("stored status is malformed", now)
        }
    }
}

fn build_settings_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    now: OffsetDateTime,
) -> ApiResponse<SettingsResponse> {
    let stored = match state.read() {
        Ok(guard) => guard.get(&paths::settings(device)).cloned(),
        Err(_) => return internal_error("state lock poisoned while reading settings", now),
    };
    match stored {
        Some(stored) => ApiResponse::ok(settings_from_value(&stored)),
        None => not_found(format!("No settings for device {device}"), now),
    }
}

fn build_settings_patch_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    patch: SettingsPatch,
    now: OffsetDateTime,
) -> ApiResponse<SettingsResponse> {
    let mut guard = match state.write() {
        Ok(guard) => guard,
        Err(_) => return internal_error("state lock poisoned while updating settings", now),
    };
    let path = paths::settings(device);
    let Some(stored) = guard.get(&path) else {
        return not_found(format!("No settings for device {device}"), now);
    };

    let mut merged = settings_from_value(stored);
    let fields = patch_fields(&patch);
    apply_patch(&mut merged, patch);
    if let Err(err) = validate_settings(&merged) {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidSettings,
            err.to_string(),
            now,
        );
    }

    let changed: Vec<String> = fields.keys().cloned().collect();
    guard.merge(&path, fields);
    drop(guard);
    info!(device, fields = ?changed, "Settings updated");
    ApiResponse::ok(merged)
}

fn build_command_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    request: CommandRequest,
    now: OffsetDateTime,
) -> ApiResponse<CommandResponse> {
    let mut guard = match state.write() {
        Ok(guard) => guard,
        Err(_) => return internal_error("state lock poisoned while writing command", now),
    };
    if guard.get(&paths::settings(device)).is_none() {
        return not_found(format!("Unknown device {device}"), now);
    }
    guard.set(&paths::command(device), Value::Bool(request.is_pump_on));
    drop(guard);

    info!(device, is_pump_on = request.is_pump_on, "Manual pump command received");
    ApiResponse::ok(CommandResponse {
        is_pump_on: request.is_pump_on,
        timestamp: format_timestamp(now),
    })
}

fn build_events_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    limit: Option<usize>,
    now: OffsetDateTime,
) -> ApiResponse<EventsResponse> {
    let mut events = match state.read() {
        Ok(guard) => load_events(&guard, device),
        Err(_) => return internal_error("state lock poisoned while reading events", now),
    };
    events.sort_by(|a, b| b.start_pump.cmp(&a.start_pump).then_with(|| b.key.cmp(&a.key)));
    events.truncate(limit.unwrap_or(DEFAULT_EVENTS_LIMIT));

    let events = events
        .into_iter()
        .map(|event| EventResponse {
            start_pump: format_timestamp(event.start_pump),
            end_pump: format_timestamp(event.end_pump),
            id: event.key,
            mode: event.mode,
            water_level: event.water_level,
            duration_seconds: event.duration_seconds,
            amount_milliliters: event.amount_milliliters,
            degraded: event.degraded,
        })
        .collect();
    ApiResponse::ok(EventsResponse {
        events,
        timestamp: format_timestamp(now),
    })
}

fn build_summary_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    now: OffsetDateTime,
) -> ApiResponse<SummaryResponse> {
    let events = match state.read() {
        Ok(guard) => load_events(&guard, device),
        Err(_) => return internal_error("state lock poisoned while reading events", now),
    };

    let mut per_day: BTreeMap<time::Date, (u64, usize)> = BTreeMap::new();
    for event in &events {
        let entry = per_day.entry(event.start_pump.date()).or_default();
        entry.0 += event.amount_milliliters;
        entry.1 += 1;
    }
    let days: Vec<DaySummary> = per_day
        .into_iter()
        .map(|(date, (total_milliliters, events))| DaySummary {
            date: date.to_string(),
            total_milliliters,
            events,
        })
        .collect();

    ApiResponse::ok(SummaryResponse {
        total_milliliters: days.iter().map(|day| day.total_milliliters).sum(),
        max_day_milliliters: days
            .iter()
            .map(|day| day.total_milliliters)
            .max()
            .unwrap_or(0),
        days,
        timestamp: format_timestamp(now),
    })
}

fn build_notifications_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    now: OffsetDateTime,
) -> ApiResponse<NotificationsResponse> {
    let mut notifications = match state.read() {
        Ok(guard) => load_notifications(&guard, device),
        Err(_) => return internal_error("state lock poisoned while reading notifications", now),
    };
    notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

    let unread = notifications.iter().filter(|n| !n.read).count();
    ApiResponse::ok(NotificationsResponse {
        notifications: notifications.into_iter().map(notification_response).collect(),
        unread,
        timestamp: format_timestamp(now),
    })
}

fn build_mark_read_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    id: &str,
    now: OffsetDateTime,
) -> ApiResponse<NotificationResponse> {
    let mut guard = match state.write() {
        Ok(guard) => guard,
        Err(_) => return internal_error("state lock poisoned while updating notification", now),
    };
    let path = paths::notification(device, id);
    let Some(stored) = guard.get(&path).cloned() else {
        return not_found(format!("No notification {id}"), now);
    };
    let mut notification = match serde_json::from_value::<Notification>(stored) {
        Ok(notification) => notification,
        Err(err) => {
            warn!(device, id, error = %err, "Stored notification is malformed");
            return internal_error("stored notification is malformed", now);
        }
    };

    guard.set(&format!("{path}/read"), Value::Bool(true));
    drop(guard);
    notification.read = true;
    ApiResponse::ok(notification_response(notification))
}

fn build_clear_notifications_response(
    state: Arc<RwLock<AppState>>,
    device: &str,
    now: OffsetDateTime,
) -> ApiResponse<ClearedResponse> {
    let removed = match state.write() {
        Ok(mut guard) => guard.remove(&paths::notifications(device)),
        Err(_) => return internal_error("state lock poisoned while clearing notifications", now),
    };
    let removed = removed
        .as_ref()
        .and_then(Value::as_object)
        .map_or(0, Map::len);

    info!(device, removed, "Notifications cleared");
    ApiResponse::ok(ClearedResponse {
        removed,
        timestamp: format_timestamp(now),
    })
}

fn load_events(state: &AppState, device: &str) -> Vec<Event> {
    let Some(Value::Object(entries)) = state.get(&paths::events(device)) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(key, value)| match serde_json::from_value::<Event>(value.clone()) {
            Ok(mut event) => {
                event.key = key.clone();
                Some(event)
            }
            Err(err) => {
                warn!(device, key = %key, error = %err, "Skipping malformed event");
                None
            }
        })
        .collect()
}

fn load_notifications(state: &AppState, device: &str) -> Vec<Notification> {
    let Some(Value::Object(entries)) = state.get(&paths::notifications(device)) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(
            |(key, value)| match serde_json::from_value::<Notification>(value.clone()) {
                Ok(notification) => Some(notification),
                Err(err) => {
                    warn!(device, key = %key, error = %err, "Skipping malformed notification");
                    None
                }
            },
        )
        .collect()
}

fn notification_response(notification: Notification) -> NotificationResponse {
    NotificationResponse {
        created_at: format_timestamp(notification.timestamp),
        id: notification.id,
        title: notification.title,
        message: notification.message,
        kind: notification.kind,
        read: notification.read,
        related_event: notification.related_event,
    }
}

fn settings_from_value(stored: &Value) -> SettingsResponse {
    let field = |name: &str| stored.get(name);
    SettingsResponse {
        tank_height: field(paths::TANK_HEIGHT).and_then(Value::as_f64),
        sensor_to_bottom: field(paths::SENSOR_TO_BOTTOM).and_then(Value::as_f64),
        pump_flow_lpm: field(paths::PUMP_FLOW_LPM).and_then(Value::as_f64),
        is_auto_mode: field(paths::IS_AUTO_MODE).and_then(Value::as_bool),
        min_water_level: field(paths::MIN_WATER_LEVEL).and_then(as_level),
        max_water_level: field(paths::MAX_WATER_LEVEL).and_then(as_level),
        notifications_enabled: field(paths::NOTIFICATIONS_ENABLED).and_then(Value::as_bool),
        pumping_alert: field(paths::PUMPING_ALERT).and_then(Value::as_bool),
    }
}

fn patch_fields(patch: &SettingsPatch) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut put = |name: &str, value: Option<Value>| {
        if let Some(value) = value {
            fields.insert(name.to_string(), value);
        }
    };
    put(paths::TANK_HEIGHT, patch.tank_height.map(Value::from));
    put(paths::SENSOR_TO_BOTTOM, patch.sensor_to_bottom.map(Value::from));
    put(paths::PUMP_FLOW_LPM, patch.pump_flow_lpm.map(Value::from));
    put(paths::IS_AUTO_MODE, patch.is_auto_mode.map(Value::from));
    put(paths::MIN_WATER_LEVEL, patch.min_water_level.map(Value::from));
    put(paths::MAX_WATER_LEVEL, patch.max_water_level.map(Value::from));
    put(paths::NOTIFICATIONS_ENABLED, patch.notifications_enabled.map(Value::from));
    put(paths::PUMPING_ALERT, patch.pumping_alert.map(Value::from));
    fields
}

fn apply_patch(settings: &mut SettingsResponse, patch: SettingsPatch) {
    settings.tank_height = patch.tank_height.or(settings.tank_height);
    settings.sensor_to_bottom = patch.sensor_to_bottom.or(settings.sensor_to_bottom);
    settings.pump_flow_lpm = patch.pump_flow_lpm.or(settings.pump_flow_lpm);
    settings.is_auto_mode = patch.is_auto_mode.or(settings.is_auto_mode);
    settings.min_water_level = patch.min_water_level.or(settings.min_water_level);
    settings.max_water_level = patch.max_water_level.or(settings.max_water_level);
    settings.notifications_enabled = patch
        .notifications_enabled
        .or(settings.notifications_enabled);
    settings.pumping_alert = patch.pumping_alert.or(settings.pumping_alert);
}

fn validate_settings(settings: &SettingsResponse) -> Result<(), AppError> {
    for (name, value) in [
        ("tank height", settings.tank_height),
        ("sensor to bottom", settings.sensor_to_bottom),
        ("pump flow", settings.pump_flow_lpm),
    ] {
        if let Some(value) = value
            && !(value.is_finite() && value > 0.0)
        {
            return Err(AppError::InvalidSettings(format!(
                "{name} must be positive, got {value}"
            )));
        }
    }
    if let (Some(tank_height), Some(sensor_to_bottom)) =
        (settings.tank_height, settings.sensor_to_bottom)
    {
        TankGeometry::new(tank_height, sensor_to_bottom)?;
    }
    for level in [settings.min_water_level, settings.max_water_level]
        .into_iter()
        .flatten()
    {
        if level > 100 {
            return Err(AppError::InvalidSettings(format!(
                "water level thresholds must be within 0-100, got {level}"
            )));
        }
    }
    if let (Some(on), Some(off)) = (settings.min_water_level, settings.max_water_level) {
        Thresholds::new(on, off)?;
    }
    Ok(())
}

fn format_timestamp(instant: OffsetDateTime) -> String {
    format_iso8601(instant).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format response timestamp");
        "1970-01-01T00:00:00Z".to_string()
    })
}

fn error_response<T>(
    status: StatusCode,
    error_code: ErrorCode,
    error_message: String,
    now: OffsetDateTime,
) -> ApiResponse<T> {
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message,
            timestamp: format_timestamp(now),
        },
    }
}

fn not_found<T>(message: String, now: OffsetDateTime) -> ApiResponse<T> {
    error_response(StatusCode::NOT_FOUND, ErrorCode::NotFound, message, now)
}

fn internal_error<T>(message: &str, now: OffsetDateTime) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling API request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        now,
    )
}
