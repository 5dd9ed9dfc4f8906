//! The control loop: one engine owns the sensor, filter, controller and
//! actuator, and runs on its own thread.

use crate::bus::relay::PumpActuator;
use crate::bus::telemetry::{TelemetrySink, TelemetryWrite};
use crate::clock::Clock;
use crate::control::{CycleInput, Mode, PumpCommand, PumpController};
use crate::estimation::LevelEstimator;
use crate::events::EventRecorder;
use crate::sensor::DistanceSensor;
use crate::sensor::sampler::DistanceSampler;
use crate::state::{AppState, CycleReport};
use crate::status::StatusPublisher;
use crate::store::{DeviceSettings, KeyValueStore, paths, read_command};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resolves the remote manual command against what auto control last decided.
///
/// A remote value that changed since it was last seen is a fresh command and
/// wins. An unchanged or unreadable remote value leaves the latched command
/// alone, so auto control is not undone by a value it has not yet mirrored.
/// A latched command stays unmirrored until its write to the store was queued.
#[derive(Debug, Clone)]
pub struct CommandLatch {
    last_remote: Option<bool>,
    command: PumpCommand,
    unmirrored: bool,
}

impl CommandLatch {
    pub fn new() -> Self {
        Self {
            last_remote: None,
            command: PumpCommand::Off,
            unmirrored: false,
        }
    }

    pub fn observe(&mut self, remote: Option<bool>) -> PumpCommand {
        if let Some(value) = remote
            && self.last_remote != Some(value)
        {
            self.last_remote = Some(value);
            self.command = PumpCommand::from(value);
            self.unmirrored = false;
        }
        self.command
    }

    pub fn latch(&mut self, command: PumpCommand) {
        if command != self.command {
            self.command = command;
            self.unmirrored = true;
        }
    }

    pub fn command(&self) -> PumpCommand {
        self.command
    }

    pub fn is_unmirrored(&self) -> bool {
        self.unmirrored
    }

    pub fn mark_mirrored(&mut self) {
        self.unmirrored = false;
    }
}

impl Default for CommandLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ControlEngine<S, A, C> {
    device: String,
    sampler: DistanceSampler<S>,
    estimator: LevelEstimator,
    controller: PumpController<A>,
    recorder: EventRecorder,
    publisher: StatusPublisher,
    settings: DeviceSettings,
    command: CommandLatch,
    clock: C,
    level: Option<u8>,
}

impl<S, A, C> ControlEngine<S, A, C>
where
    S: DistanceSensor,
    A: PumpActuator,
    C: Clock,
{
    pub fn new(
        device: impl Into<String>,
        sampler: DistanceSampler<S>,
        estimator: LevelEstimator,
        actuator: A,
        settings: DeviceSettings,
        clock: C,
    ) -> Self {
        let device = device.into();
        Self {
            recorder: EventRecorder::new(device.clone()),
            publisher: StatusPublisher::new(device.clone()),
            controller: PumpController::new(actuator, settings.mode),
            device,
            sampler,
            estimator,
            settings,
            command: CommandLatch::new(),
            clock,
            level: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn level(&self) -> Option<u8> {
        self.level
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn command(&self) -> PumpCommand {
        self.command.command()
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        self.sampler.sensor_mut()
    }

    /// Run one full cycle: settings, sample, estimate, control, record, publish.
    /// Faults are logged and reflected in the report; none abort the cycle.
    pub fn run_cycle<K>(&mut self, store: &K, sink: &dyn TelemetrySink) -> CycleReport
    where
        K: KeyValueStore + ?Sized,
    {
        let settings_faults = self.settings.refresh(store, &self.device);
        for fault in &settings_faults {
            warn!(error = %fault, "Keeping previous setting");
        }

        let (raw_distance, filtered_distance, sensor_fault) = match self.sampler.sample() {
            Ok(raw) => {
                let (filtered, level) = self.estimator.estimate(raw, &self.settings.geometry);
                self.level = Some(level);
                debug!(raw, filtered, level, "Level estimated");
                (Some(raw), Some(filtered), false)
            }
            Err(err) => {
                warn!(error = %err, retained_level = ?self.level, "Sensor fault");
                (None, None, true)
            }
        };
        let now = self.clock.now();

        let remote = match read_command(store, &self.device) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(error = %err, "Keeping last pump command");
                None
            }
        };
        let command = self.command.observe(remote);

        let mut transitions = 0;
        let mut status_published = false;
        match self.level {
            Some(level) => {
                let decision = self.controller.evaluate(&CycleInput {
                    level,
                    mode: self.settings.mode,
                    thresholds: self.settings.thresholds,
                    command,
                    now,
                });
                self.command.latch(decision.command);
                self.mirror_command(sink);
                transitions = decision.transitions.len();
                for transition in &decision.transitions {
                    self.recorder.emit(
                        transition,
                        self.settings.pump_flow_lpm,
                        self.settings.pump_notifications(),
                        sink,
                    );
                }
                let is_pumping = self.controller.pump_state().is_pumping;
                status_published = self
                    .publisher
                    .publish_if_changed(level, is_pumping, now, sink)
                    .is_some();
            }
            None => debug!("No level estimated yet, pump control skipped"),
        }

        CycleReport {
            timestamp: now,
            raw_distance,
            filtered_distance,
            level: self.level,
            phase: self.controller.phase(),
            sensor_fault,
            settings_faults: settings_faults.len(),
            transitions,
            status_published,
        }
    }
}

impl<S, A, C> ControlEngine<S, A, C>
where
    A: PumpActuator,
    C: Clock,
{
    /// Close any open pump session, record its event and leave the relay low.
    pub fn shut_down(&mut self, sink: &dyn TelemetrySink) {
        let now = self.clock.now();
        let level = self.level.unwrap_or_default();
        let Some(transition) = self.controller.shut_down(level, now) else {
            return;
        };
        self.command.latch(PumpCommand::Off);
        self.mirror_command(sink);
        self.recorder.emit(
            &transition,
            self.settings.pump_flow_lpm,
            self.settings.pump_notifications(),
            sink,
        );
        self.publisher.publish_if_changed(level, false, now, sink);
    }

    fn mirror_command(&mut self, sink: &dyn TelemetrySink) {
        if !self.command.is_unmirrored() {
            return;
        }
        let command = self.command.command();
        if sink.submit(TelemetryWrite::set(
            paths::command(&self.device),
            Value::Bool(command.is_on()),
        )) {
            self.command.mark_mirrored();
        } else {
            debug!(command = ?command, "Pump command not mirrored, retrying next cycle");
        }
    }
}

/// Spawn the control thread. It runs a cycle every `interval` until `stop` is set,
/// storing each report in the shared state, then shuts the engine down.
pub fn spawn_control_thread<S, A, C, Q>(
    mut engine: ControlEngine<S, A, C>,
    state: Arc<RwLock<AppState>>,
    sink: Q,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    S: DistanceSensor + Send + 'static,
    A: PumpActuator + Send + 'static,
    C: Clock + Send + 'static,
    Q: TelemetrySink + Send + 'static,
{
    std::thread::spawn(move || {
        info!(
            device = engine.device(),
            interval_ms = interval.as_millis(),
            auto = engine.settings().mode == Mode::Auto,
            "Control loop started"
        );
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            let report = engine.run_cycle(&state, &sink);
            match state.write() {
                Ok(mut guard) => guard.set_last_cycle(report),
                Err(_) => warn!("State lock poisoned while storing cycle report"),
            }

            sleep_with_stop(interval, &stop, cycle_start);
        }
        engine.shut_down(&sink);
        info!("Control loop stopped, pump off");
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let elapsed = start.elapsed();
    if elapsed >= duration {
        return;
    }
    let remaining = duration - elapsed;
    let step = Duration::from_millis(100).min(remaining);
    let mut slept = Duration::ZERO;

    while slept < remaining {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(step);
        slept += step;
    }
}
