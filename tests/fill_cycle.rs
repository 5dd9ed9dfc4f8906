use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tank_flow::bus::relay::MockRelay;
use tank_flow::bus::telemetry::{run_telemetry_writer, telemetry_channel};
use tank_flow::clock::ManualClock;
use tank_flow::control::{Mode, PumpPhase, Thresholds};
use tank_flow::engine::ControlEngine;
use tank_flow::error::AppError;
use tank_flow::estimation::filter::SmoothingFilter;
use tank_flow::estimation::{LevelEstimator, TankGeometry};
use tank_flow::sensor::mock::{MockDistanceSensor, MockReading};
use tank_flow::sensor::sampler::DistanceSampler;
use tank_flow::state::AppState;
use tank_flow::store::{DeviceSettings, KeyValueStore, seed_device};
use time::OffsetDateTime;

type Engine = ControlEngine<MockDistanceSensor, MockRelay, ManualClock>;

fn settings() -> Result<DeviceSettings, AppError> {
    Ok(DeviceSettings {
        geometry: TankGeometry::new(7.0, 14.05)?,
        pump_flow_lpm: 1.6,
        mode: Mode::Auto,
        thresholds: Thresholds::new(20, 90)?,
        notifications_enabled: true,
        pumping_alert: true,
    })
}

fn distance_for(level: u8) -> f64 {
    14.05 - 7.0 * f64::from(level) / 100.0
}

fn engine(
    sensor: MockDistanceSensor,
    relay: MockRelay,
    clock: ManualClock,
) -> Result<Engine, AppError> {
    Ok(ControlEngine::new(
        "device1",
        DistanceSampler::new(sensor, 5, Duration::ZERO),
        LevelEstimator::new(SmoothingFilter::moving_average(1)?),
        relay,
        settings()?,
        clock,
    ))
}

fn children(store: &Arc<RwLock<AppState>>, path: &str) -> Result<usize, AppError> {
    Ok(store
        .get(path)?
        .as_ref()
        .and_then(Value::as_object)
        .map_or(0, |entries| entries.len()))
}

#[tokio::test]
async fn auto_fill_cycle_lands_in_store() -> Result<(), AppError> {
    let start = OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_760_000_000);
    let store = Arc::new(RwLock::new(AppState::new()));
    seed_device(&store, "device1", &settings()?, start)?;
    let (queue, rx) = telemetry_channel(64);
    let writer = tokio::spawn(run_telemetry_writer(rx, Arc::clone(&store)));
    let relay = MockRelay::new();
    let clock = ManualClock::new(start);
    let mut engine = engine(
        MockDistanceSensor::constant(distance_for(50)),
        relay.clone(),
        clock.clone(),
    )?;

    let mut phases = Vec::new();
    for level in [50u8, 15, 30, 60, 88] {
        engine.sensor_mut().set_distance(distance_for(level));
        phases.push(engine.run_cycle(&store, &queue).phase);
        clock.advance(Duration::from_secs(60));
        tokio::task::yield_now().await;
    }
    drop(queue);
    writer
        .await
        .map_err(|err| AppError::TelemetryWrite(err.to_string()))?;

    assert_eq!(
        phases,
        vec![
            PumpPhase::Idle,
            PumpPhase::PumpingAuto,
            PumpPhase::PumpingAuto,
            PumpPhase::PumpingAuto,
            PumpPhase::Idle,
        ]
    );
    assert_eq!(relay.calls(), vec![false, true, false]);
    assert_eq!(children(&store, "/history/device1/events")?, 1);
    let events = store.get("/history/device1/events")?.unwrap_or(Value::Null);
    let event = events
        .as_object()
        .and_then(|entries| entries.values().next())
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(event["duration"], json!(180));
    assert_eq!(event["amountMilliliters"], json!(4800));
    assert_eq!(event["waterLevel"], json!(88));
    assert_eq!(
        store.get("/devices/device1/status/waterLevel")?,
        Some(json!(88))
    );
    assert_eq!(
        store.get("/devices/device1/status/isPumpOn")?,
        Some(json!(false))
    );
    assert_eq!(
        store.get("/devices/device1/command/isPumpOn")?,
        Some(json!(false))
    );
    // seeded "System ready" plus start and stop
    assert_eq!(children(&store, "/notifications/device1")?, 3);
    Ok(())
}

#[tokio::test]
async fn remote_stop_and_sensor_dropouts_are_tolerated() -> Result<(), AppError> {
    let start = OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_760_000_000);
    let store = Arc::new(RwLock::new(AppState::new()));
    seed_device(&store, "device1", &settings()?, start)?;
    let (queue, rx) = telemetry_channel(64);
    let writer = tokio::spawn(run_telemetry_writer(rx, Arc::clone(&store)));
    let relay = MockRelay::new();
    let clock = ManualClock::new(start);
    // one batch of five invalid reads between two good levels
    let sensor = MockDistanceSensor::scripted(
        vec![MockReading::Distance(distance_for(10)); 5]
            .into_iter()
            .chain(vec![MockReading::Invalid; 5])
            .collect(),
        MockReading::Distance(distance_for(12)),
    );
    let mut engine = engine(sensor, relay.clone(), clock.clone())?;

    let first = engine.run_cycle(&store, &queue);
    // wait for the mirrored auto command to reach the store
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.get("/devices/device1/command/isPumpOn")? != Some(json!(true)) {
            tokio::task::yield_now().await;
        }
        Ok::<(), AppError>(())
    })
    .await
    .map_err(|_| AppError::TelemetryWrite("mirrored command never applied".to_string()))??;
    clock.advance(Duration::from_secs(10));
    let dropout = engine.run_cycle(&store, &queue);
    clock.advance(Duration::from_secs(10));

    store.set("/devices/device1/command/isPumpOn", json!(false))?;
    let stopped = engine.run_cycle(&store, &queue);
    drop(queue);
    writer
        .await
        .map_err(|err| AppError::TelemetryWrite(err.to_string()))?;

    assert_eq!(first.phase, PumpPhase::PumpingAuto);
    assert!(dropout.sensor_fault);
    assert_eq!(dropout.level, Some(10));
    assert_eq!(dropout.phase, PumpPhase::PumpingAuto);
    assert_eq!(stopped.phase, PumpPhase::Idle);
    assert_eq!(stopped.level, Some(12));
    assert_eq!(relay.calls(), vec![false, true, false]);
    assert_eq!(children(&store, "/history/device1/events")?, 1);
    Ok(())
}
