//! Pump state machine: automatic hysteresis control plus a remote manual override.
//!
//! The controller owns the actuator. Every cycle it first applies the auto
//! rules (only when the device is in auto mode), which may rewrite the
//! command, and then applies the manual rules against that command. Only one
//! [`PumpSession`] can exist, and it lives inside the pumping state itself.

use crate::bus::relay::PumpActuator;
use crate::error::AppError;
use crate::events::KeyGenerator;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

/// Points below the off-threshold at which auto pumping already stops, to absorb overshoot.
pub const EARLY_RELEASE_MARGIN: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Auto,
    Manual,
}

impl Mode {
    pub fn from_auto_flag(is_auto: bool) -> Self {
        if is_auto { Self::Auto } else { Self::Manual }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    On,
    Off,
}

impl PumpCommand {
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl From<bool> for PumpCommand {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    on: u8,
    off: u8,
}

impl Thresholds {
    pub fn new(on: u8, off: u8) -> Result<Self, AppError> {
        if on > 100 || off > 100 {
            return Err(AppError::InvalidSettings(format!(
                "thresholds must be within 0-100, got on={on} off={off}"
            )));
        }
        if on >= off {
            return Err(AppError::InvalidSettings(format!(
                "threshold on ({on}) must be below threshold off ({off})"
            )));
        }
        Ok(Self { on, off })
    }

    pub fn on(&self) -> u8 {
        self.on
    }

    pub fn off(&self) -> u8 {
        self.off
    }

    pub fn release_level(&self) -> u8 {
        self.off.saturating_sub(EARLY_RELEASE_MARGIN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSession {
    pub started_at: OffsetDateTime,
    pub mode: Mode,
    /// Key the closing event will be written under.
    pub event_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ControllerState {
    Idle,
    PumpingAuto(PumpSession),
    PumpingManual(PumpSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpPhase {
    Idle,
    PumpingAuto,
    PumpingManual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpState {
    pub is_pumping: bool,
    pub is_auto_pumping: bool,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started {
        mode: Mode,
        level: u8,
        threshold_on: u8,
        event_key: String,
        at: OffsetDateTime,
    },
    Stopped {
        session: PumpSession,
        level: u8,
        at: OffsetDateTime,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CycleInput {
    pub level: u8,
    pub mode: Mode,
    pub thresholds: Thresholds,
    pub command: PumpCommand,
    pub now: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Command after the auto rules ran; differs from the input when auto control switched the pump.
    pub command: PumpCommand,
    pub transitions: Vec<Transition>,
}

#[derive(Debug)]
pub struct PumpController<A> {
    actuator: A,
    state: ControllerState,
    mode: Mode,
    event_keys: KeyGenerator,
}

impl<A: PumpActuator> PumpController<A> {
    /// Takes ownership of the actuator and drives it low.
    pub fn new(mut actuator: A, mode: Mode) -> Self {
        actuator.set_pump(false);
        Self {
            actuator,
            state: ControllerState::Idle,
            mode,
            event_keys: KeyGenerator::new("evt"),
        }
    }

    pub fn phase(&self) -> PumpPhase {
        match self.state {
            ControllerState::Idle => PumpPhase::Idle,
            ControllerState::PumpingAuto(_) => PumpPhase::PumpingAuto,
            ControllerState::PumpingManual(_) => PumpPhase::PumpingManual,
        }
    }

    pub fn pump_state(&self) -> PumpState {
        PumpState {
            is_pumping: self.phase() != PumpPhase::Idle,
            is_auto_pumping: self.phase() == PumpPhase::PumpingAuto,
            mode: self.mode,
        }
    }

    pub fn evaluate(&mut self, input: &CycleInput) -> Decision {
        self.mode = input.mode;
        let mut command = input.command;
        let mut transitions = Vec::new();

        if input.mode == Mode::Auto {
            match self.phase() {
                PumpPhase::Idle if input.level < input.thresholds.on() => {
                    transitions.push(self.start(Mode::Auto, input));
                    command = PumpCommand::On;
                }
                PumpPhase::PumpingAuto if input.level >= input.thresholds.release_level() => {
                    transitions.extend(self.stop(input.level, input.now));
                    command = PumpCommand::Off;
                }
                _ => {}
            }
        }

        match (self.phase(), command) {
            (PumpPhase::Idle, PumpCommand::On) => {
                transitions.push(self.start(Mode::Manual, input));
            }
            (PumpPhase::PumpingAuto | PumpPhase::PumpingManual, PumpCommand::Off) => {
                transitions.extend(self.stop(input.level, input.now));
            }
            _ => {}
        }

        Decision {
            command,
            transitions,
        }
    }

    fn start(&mut self, mode: Mode, input: &CycleInput) -> Transition {
        self.actuator.set_pump(true);
        let event_key = self.event_keys.next(input.now);
        let session = PumpSession {
            started_at: input.now,
            mode,
            event_key: event_key.clone(),
        };
        self.state = match mode {
            Mode::Auto => ControllerState::PumpingAuto(session),
            Mode::Manual => ControllerState::PumpingManual(session),
        };
        info!(
            mode = ?mode,
            level = input.level,
            threshold_on = input.thresholds.on(),
            event_key = %event_key,
            "Pump started"
        );
        Transition::Started {
            mode,
            level: input.level,
            threshold_on: input.thresholds.on(),
            event_key,
            at: input.now,
        }
    }

    /// Close any open session and leave the actuator low, whatever the state.
    pub fn shut_down(&mut self, level: u8, now: OffsetDateTime) -> Option<Transition> {
        let transition = self.stop(level, now);
        self.actuator.set_pump(false);
        transition
    }

    fn stop(&mut self, level: u8, now: OffsetDateTime) -> Option<Transition> {
        let session = match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Idle => return None,
            ControllerState::PumpingAuto(session) | ControllerState::PumpingManual(session) => {
                session
            }
        };
        self.actuator.set_pump(false);
        info!(
            mode = ?session.mode,
            level,
            event_key = %session.event_key,
            "Pump stopped"
        );
        Some(Transition::Stopped {
            session,
            level,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::relay::MockRelay;
    use std::time::Duration;

    fn thresholds() -> Thresholds {
        Thresholds::new(20, 90).expect("valid thresholds")
    }

    fn input(level: u8, mode: Mode, command: PumpCommand, seconds: u64) -> CycleInput {
        CycleInput {
            level,
            mode,
            thresholds: thresholds(),
            command,
            now: OffsetDateTime::UNIX_EPOCH + Duration::from_secs(seconds),
        }
    }

    #[test]
    fn auto_fill_cycle_switches_exactly_once_each_way() {
        let relay = MockRelay::new();
        let mut controller = PumpController::new(relay.clone(), Mode::Auto);
        let mut command = PumpCommand::Off;
        let mut starts = Vec::new();
        let mut stops = Vec::new();
        let mut auto_flags = Vec::new();

        for (tick, level) in [50u8, 30, 10, 40, 90, 98].into_iter().enumerate() {
            let decision = controller.evaluate(&input(level, Mode::Auto, command, tick as u64));
            command = decision.command;
            for transition in decision.transitions {
                match transition {
                    Transition::Started { level, mode, .. } => starts.push((level, mode)),
                    Transition::Stopped { level, session, .. } => stops.push((level, session.mode)),
                }
            }
            auto_flags.push(controller.pump_state().is_auto_pumping);
        }

        assert_eq!(starts, vec![(10, Mode::Auto)]);
        assert_eq!(stops, vec![(90, Mode::Auto)]);
        assert_eq!(auto_flags, vec![false, false, true, true, false, false]);
        assert_eq!(relay.calls(), vec![false, true, false]);
        assert_eq!(command, PumpCommand::Off);
    }

    #[test]
    fn auto_stops_at_early_release_level() {
        let mut controller = PumpController::new(MockRelay::new(), Mode::Auto);
        let started = controller.evaluate(&input(5, Mode::Auto, PumpCommand::Off, 0));
        assert_eq!(started.command, PumpCommand::On);

        let still_running = controller.evaluate(&input(86, Mode::Auto, started.command, 1));
        assert!(still_running.transitions.is_empty());

        let stopped = controller.evaluate(&input(87, Mode::Auto, still_running.command, 2));
        assert_eq!(stopped.transitions.len(), 1);
        assert_eq!(controller.phase(), PumpPhase::Idle);
    }

    #[test]
    fn manual_off_overrides_running_auto_session() {
        let relay = MockRelay::new();
        let mut controller = PumpController::new(relay.clone(), Mode::Auto);
        controller.evaluate(&input(10, Mode::Auto, PumpCommand::Off, 0));
        assert!(controller.pump_state().is_auto_pumping);

        let decision = controller.evaluate(&input(40, Mode::Auto, PumpCommand::Off, 30));

        assert!(matches!(
            decision.transitions.as_slice(),
            [Transition::Stopped { session, .. }] if session.mode == Mode::Auto
        ));
        let state = controller.pump_state();
        assert!(!state.is_pumping);
        assert!(!state.is_auto_pumping);
        assert!(!relay.is_on());
    }

    #[test]
    fn auto_start_with_on_command_does_not_double_start() {
        let mut controller = PumpController::new(MockRelay::new(), Mode::Auto);

        let decision = controller.evaluate(&input(10, Mode::Auto, PumpCommand::On, 0));

        assert_eq!(decision.transitions.len(), 1);
        assert_eq!(controller.phase(), PumpPhase::PumpingAuto);
    }

    #[test]
    fn manual_command_runs_pump_in_manual_mode() {
        let relay = MockRelay::new();
        let mut controller = PumpController::new(relay.clone(), Mode::Manual);

        let on = controller.evaluate(&input(5, Mode::Manual, PumpCommand::On, 0));
        assert!(matches!(
            on.transitions.as_slice(),
            [Transition::Started { mode: Mode::Manual, .. }]
        ));
        assert!(relay.is_on());

        // full tank does not stop a manual run
        let full = controller.evaluate(&input(100, Mode::Manual, PumpCommand::On, 60));
        assert!(full.transitions.is_empty());
        assert_eq!(controller.phase(), PumpPhase::PumpingManual);

        let off = controller.evaluate(&input(100, Mode::Manual, PumpCommand::Off, 120));
        assert_eq!(off.transitions.len(), 1);
        assert!(!relay.is_on());
    }

    #[test]
    fn manual_mode_ignores_low_level() {
        let mut controller = PumpController::new(MockRelay::new(), Mode::Manual);

        let decision = controller.evaluate(&input(0, Mode::Manual, PumpCommand::Off, 0));

        assert!(decision.transitions.is_empty());
        assert_eq!(controller.phase(), PumpPhase::Idle);
    }

    #[test]
    fn manual_on_in_auto_mode_above_threshold_starts_manual_session() {
        let mut controller = PumpController::new(MockRelay::new(), Mode::Auto);

        controller.evaluate(&input(60, Mode::Auto, PumpCommand::On, 0));

        assert_eq!(controller.phase(), PumpPhase::PumpingManual);
        assert!(!controller.pump_state().is_auto_pumping);
    }

    #[test]
    fn session_carries_event_key_from_start_to_stop() {
        let mut controller = PumpController::new(MockRelay::new(), Mode::Auto);
        let start = controller.evaluate(&input(10, Mode::Auto, PumpCommand::Off, 0));
        let stop = controller.evaluate(&input(95, Mode::Auto, start.command, 10));

        let Some(Transition::Started { event_key, .. }) = start.transitions.first() else {
            panic!("expected start transition");
        };
        let Some(Transition::Stopped { session, .. }) = stop.transitions.first() else {
            panic!("expected stop transition");
        };
        assert_eq!(&session.event_key, event_key);
    }

    #[test]
    fn shut_down_closes_session_and_drives_relay_low() {
        let relay = MockRelay::new();
        let mut controller = PumpController::new(relay.clone(), Mode::Auto);
        controller.evaluate(&input(10, Mode::Auto, PumpCommand::Off, 0));
        assert!(relay.is_on());

        let closed = controller.shut_down(35, OffsetDateTime::UNIX_EPOCH + Duration::from_secs(45));

        match closed {
            Some(Transition::Stopped { session, level, .. }) => {
                assert_eq!(session.mode, Mode::Auto);
                assert_eq!(level, 35);
            }
            other => panic!("expected a stop transition, got {other:?}"),
        }
        assert_eq!(controller.phase(), PumpPhase::Idle);
        assert!(!relay.is_on());
        assert!(controller.shut_down(35, OffsetDateTime::UNIX_EPOCH).is_none());
        assert_eq!(relay.calls(), vec![false, true, false, false]);
    }

    #[test]
    fn thresholds_enforce_ordering_and_range() {
        assert!(Thresholds::new(90, 20).is_err());
        assert!(Thresholds::new(50, 50).is_err());
        assert!(Thresholds::new(0, 101).is_err());
        assert_eq!(Thresholds::new(0, 2).map(|t| t.release_level()).ok(), Some(0));
    }
}
