use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tank_flow::bus::relay::{MockRelay, PumpActuator, RppalRelay};
use tank_flow::bus::telemetry::{run_telemetry_writer, telemetry_channel};
use tank_flow::clock::{Clock, SystemClock};
use tank_flow::engine::{ControlEngine, spawn_control_thread};
use tank_flow::estimation::LevelEstimator;
use tank_flow::estimation::filter::SmoothingFilter;
use tank_flow::sensor::DistanceSensor;
use tank_flow::sensor::mock::MockDistanceSensor;
use tank_flow::sensor::sampler::DistanceSampler;
use tank_flow::sensor::vl53l1x::Vl53l1xSensor;
use tank_flow::store::snapshot;
use tank_flow::{api, config, state, store};

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "tank-flow starting"
    );

    let device = config.device_id().to_string();
    let initial_settings = config.initial_settings()?;
    let store_path = config.store_path();
    let app_state = match &store_path {
        Some(path) => snapshot::restore_state(path)?,
        None => state::AppState::new(),
    };
    let state = Arc::new(RwLock::new(app_state));
    store::seed_device(&state, &device, &initial_settings, SystemClock.now())?;
    let snapshot_writer = store_path
        .clone()
        .map(|path| tokio::spawn(snapshot::run_snapshot_writer(Arc::clone(&state), path)));

    let filter = SmoothingFilter::from_settings(&config.filter_settings())?;
    tracing::info!(filter = filter.name(), "Smoothing filter selected");

    let (queue, telemetry_rx) = telemetry_channel(config.telemetry_queue_capacity());
    let writer = tokio::spawn(run_telemetry_writer(telemetry_rx, Arc::clone(&state)));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let control_handle = match open_hardware(&config) {
        Some((sensor, relay)) => {
            let engine = ControlEngine::new(
                device.clone(),
                DistanceSampler::new(sensor, config.samples_per_reading(), config.sample_pacing()),
                LevelEstimator::new(filter),
                relay,
                initial_settings,
                SystemClock,
            );
            Some(spawn_control_thread(
                engine,
                Arc::clone(&state),
                queue,
                config.cycle_interval(),
                Arc::clone(&stop_flag),
            ))
        }
        None => {
            tracing::warn!("Control loop not started - hardware unavailable");
            drop(queue);
            None
        }
    };

    let app = api::router(Arc::clone(&state));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, device = %device, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = control_handle {
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            _ => tracing::error!("Control thread panicked"),
        }
    }
    if let Err(err) = writer.await {
        tracing::error!(error = %err, "Telemetry writer task failed");
    }
    if let Some(task) = snapshot_writer {
        task.abort();
    }
    if let Some(path) = &store_path {
        let revision = snapshot::save_state(&state, path)?;
        tracing::info!(path = %path.display(), revision, "Store snapshot saved");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

type Hardware = (
    Box<dyn DistanceSensor + Send>,
    Box<dyn PumpActuator + Send>,
);

/// Open the distance sensor and pump relay, or in-memory stand-ins when
/// `[hardware].simulated` is set.
fn open_hardware(config: &config::Config) -> Option<Hardware> {
    if config.simulated_hardware() {
        let distance = config.simulated_distance_cm();
        tracing::info!(distance_cm = distance, "Using simulated sensor and relay");
        let sensor: Box<dyn DistanceSensor + Send> =
            Box::new(MockDistanceSensor::constant(distance));
        let relay: Box<dyn PumpActuator + Send> = Box::new(MockRelay::new());
        return Some((sensor, relay));
    }

    let address = config.sensor_address();
    let sensor: Box<dyn DistanceSensor + Send> = match Vl53l1xSensor::open(address) {
        Ok(sensor) => Box::new(sensor),
        Err(err) => {
            tracing::error!(
                error = %err,
                address = %format!("0x{address:02x}"),
                "Failed to open distance sensor"
            );
            return None;
        }
    };
    let pin = config.relay_pin();
    let relay: Box<dyn PumpActuator + Send> = match RppalRelay::new(pin) {
        Ok(relay) => Box::new(relay),
        Err(err) => {
            tracing::error!(error = %err, pin, "Failed to claim relay pin");
            return None;
        }
    };
    tracing::info!(address = %format!("0x{address:02x}"), pin, "Hardware ready");
    Some((sensor, relay))
}
