//! Per-tick control loop
//!
//! [`ControlLoop`] owns every component and runs them in a fixed order once
//! per tick:
//!
//! 1. Classify the sensor frame
//! 2. Advance the link and take at most one inbound command
//! 3. Step the navigator with the pattern and command
//! 4. Turn the resulting maneuver into wheel commands
//! 5. Report telemetry when due
//!
//! Nothing in a tick waits on hardware or the network. Components only see
//! values handed to them in this tick.

use embassy_time::Instant;
use heapless::Vec;

use crate::command::{HostCommand, NODE_NOTICE, PONG};
use crate::config::Config;
use crate::drive::{DifferentialDrive, DriveFault, DriveIntent, DriveOutput, WheelOutput};
use crate::link::{ConnectivityManager, LinkState, Radio};
use crate::navigator::{
    Maneuver, NavEvent, NavInput, NavState, Navigator, NodePolicy, OperatingMode,
};
use crate::pid::PositionController;
use crate::sensor::{LineClassifier, LineReading, SensorFrame};
use crate::telemetry::Telemetry;

/// Everything the loop needs from the outside for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickInput {
    pub frame: SensorFrame,
    /// Distance ahead in centimeters, reported through telemetry only
    pub distance_cm: f32,
    /// Command from a local source such as the RC buttons
    pub local_command: Option<HostCommand>,
    pub now: Instant,
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub reading: LineReading,
    pub state: NavState,
    pub maneuver: Maneuver,
    pub output: DriveOutput,
    pub link: LinkState,
    pub events: Vec<NavEvent, 8>,
    /// Command received over the link this tick
    pub remote_command: Option<HostCommand>,
}

/// The complete vehicle controller
pub struct ControlLoop<L, R, W, P> {
    config: Config,
    classifier: LineClassifier,
    pid: PositionController,
    drive: DifferentialDrive<L, R>,
    navigator: Navigator<P>,
    link: ConnectivityManager<W>,
    last_telemetry: Option<Instant>,
}

impl<L, R, W, P> ControlLoop<L, R, W, P>
where
    L: WheelOutput,
    R: WheelOutput,
    W: Radio,
    P: NodePolicy,
{
    pub fn new(config: Config, left: L, right: R, radio: W, policy: P) -> Self {
        Self {
            config,
            classifier: LineClassifier::new(config.sensor),
            pid: PositionController::new(config.pid),
            drive: DifferentialDrive::new(left, right, config.drive),
            navigator: Navigator::new(config.nav, policy),
            link: ConnectivityManager::new(radio, config.link),
            last_telemetry: None,
        }
    }

    pub fn navigator(&self) -> &Navigator<P> {
        &self.navigator
    }

    pub fn link(&self) -> &ConnectivityManager<W> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ConnectivityManager<W> {
        &mut self.link
    }

    pub fn pid_mut(&mut self) -> &mut PositionController {
        &mut self.pid
    }

    /// Runs one control step
    pub fn tick(&mut self, input: TickInput) -> Result<TickReport, DriveFault> {
        let now = input.now;
        let reading = self.classifier.classify(&input.frame);

        self.link.tick(now);
        let remote_command = self.receive_command();

        let mut events = Vec::new();
        if let Some(command) = input.local_command {
            if let Some(event) = self.navigator.command(command, now) {
                let _ = events.push(event);
            }
        }

        let nav = self.navigator.update(NavInput {
            pattern: reading.pattern,
            command: remote_command,
            now,
        });
        for event in nav.events {
            let _ = events.push(event);
        }
        for event in events.iter() {
            self.on_event(*event);
        }

        let output = match nav.maneuver {
            Maneuver::Halt => self.drive.stop()?,
            Maneuver::Follow => self.follow(&reading)?,
            Maneuver::Spin(direction) => self
                .drive
                .turn_in_place(direction, self.config.drive.turn_speed)?,
        };

        let state = self.navigator.state();
        self.report(state, &reading, input.distance_cm, now);

        Ok(TickReport {
            reading,
            state,
            maneuver: nav.maneuver,
            output,
            link: self.link.state(),
            events,
            remote_command,
        })
    }

    /// Steers towards the line around the cruise speed
    fn follow(&mut self, reading: &LineReading) -> Result<DriveOutput, DriveFault> {
        let error = self.pid.target() - i32::from(reading.position);
        let correction = self.pid.compute(error);

        let base = i32::from(self.config.drive.base_speed);
        let max = i32::from(self.config.drive.max_speed);
        let left = base.saturating_sub(correction).clamp(-max, max) as i16;
        let right = base.saturating_add(correction).clamp(-max, max) as i16;

        self.drive.apply(DriveIntent::new(left, right))
    }

    fn receive_command(&mut self) -> Option<HostCommand> {
        let message = self.link.take_message()?;
        let command = HostCommand::parse_bytes(&message.payload);

        if command == HostCommand::Ping {
            if let Err(e) = self.link.respond_to_sender(PONG.as_bytes()) {
                warn!("CTRL: pong not sent: {}", e);
            }
            return None;
        }
        Some(command)
    }

    fn on_event(&mut self, event: NavEvent) {
        match event {
            NavEvent::Started(_) | NavEvent::TurnCompleted | NavEvent::TurnTimedOut => {
                self.pid.reset();
            }
            NavEvent::WaitingForHost => {
                if let Err(e) = self.link.send_broadcast(NODE_NOTICE.as_bytes()) {
                    warn!("CTRL: node notice not sent: {}", e);
                }
            }
            _ => {}
        }
    }

    fn report(&mut self, state: NavState, reading: &LineReading, distance_cm: f32, now: Instant) {
        if !self.link.is_connected() {
            return;
        }
        let due = self
            .last_telemetry
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.telemetry.interval);
        if !due {
            return;
        }
        self.last_telemetry = Some(now);

        let record = Telemetry::new(state, reading.pattern, distance_cm);
        if let Err(e) = self.link.send_telemetry(&record) {
            warn!("CTRL: telemetry not sent: {}", e);
        }
    }

    /// Starts a run without going through the command path
    pub fn start(&mut self, mode: OperatingMode) {
        if self.navigator.start(mode).is_some() {
            self.pid.reset();
        }
    }

    /// Stops the run and coasts both wheels
    pub fn stop(&mut self) -> Result<DriveOutput, DriveFault> {
        self.navigator.stop();
        self.drive.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{MotorDirection, WheelCommand};
    use crate::link::RadioError;
    use crate::navigator::PreferStraight;
    use core::net::{Ipv4Addr, SocketAddrV4};
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct FakeWheel {
        commands: StdVec<WheelCommand>,
        broken: bool,
    }

    impl WheelOutput for FakeWheel {
        fn apply(&mut self, command: WheelCommand) -> Result<(), DriveFault> {
            if self.broken {
                return Err(DriveFault::DirectionPin);
            }
            self.commands.push(command);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoRadio;

    impl Radio for NoRadio {
        fn is_present(&self) -> bool {
            false
        }
        fn begin_join(&mut self) -> Result<(), RadioError> {
            Err(RadioError::NotPresent)
        }
        fn is_joined(&self) -> bool {
            false
        }
        fn local_address(&self) -> Option<Ipv4Addr> {
            None
        }
        fn start_host(&mut self) -> Result<(), RadioError> {
            Err(RadioError::NotPresent)
        }
        fn send_to(&mut self, _to: SocketAddrV4, _payload: &[u8]) -> Result<(), RadioError> {
            Err(RadioError::NotPresent)
        }
        fn receive(&mut self, _buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
            None
        }
    }

    type Loop = ControlLoop<FakeWheel, FakeWheel, NoRadio, PreferStraight>;

    fn control() -> Loop {
        ControlLoop::new(
            Config::DEFAULT,
            FakeWheel::default(),
            FakeWheel::default(),
            NoRadio,
            PreferStraight,
        )
    }

    fn centered() -> SensorFrame {
        SensorFrame::new([0, 0, 1000, 1000, 0, 0])
    }

    fn input(frame: SensorFrame, ms: u64) -> TickInput {
        TickInput {
            frame,
            distance_cm: 0.0,
            local_command: None,
            now: Instant::from_millis(ms),
        }
    }

    #[test]
    fn idle_loop_coasts() {
        let mut control = control();
        let report = control.tick(input(centered(), 0)).unwrap();
        assert_eq!(report.state, NavState::Idle);
        assert_eq!(report.output.left, WheelCommand::COAST);
        assert_eq!(report.output.right, WheelCommand::COAST);
    }

    #[test]
    fn centered_line_drives_both_wheels_forward() {
        let mut control = control();
        control.start(OperatingMode::Autonomous);
        let report = control.tick(input(centered(), 0)).unwrap();
        assert_eq!(report.maneuver, Maneuver::Follow);
        assert_eq!(report.output.left.direction, MotorDirection::Forward);
        assert_eq!(report.output.right.direction, MotorDirection::Forward);
    }

    #[test]
    fn line_on_the_right_speeds_up_the_left_wheel() {
        let mut control = control();
        control.start(OperatingMode::Autonomous);
        // line under sensor 4: position 4000, error -1500
        let report = control
            .tick(input(SensorFrame::new([0, 0, 0, 0, 1000, 0]), 0))
            .unwrap();
        assert_eq!(report.reading.position, 4000);
        // first tick carries the full derivative kick, both wheels saturate
        assert_eq!(report.output.left.direction, MotorDirection::Forward);
        assert_eq!(report.output.right.direction, MotorDirection::Backward);
    }

    #[test]
    fn runaway_correction_saturates_instead_of_wrapping() {
        let mut control = control();
        control.pid_mut().set_tunings(0.0, 1e9, 0.0);
        control.start(OperatingMode::Autonomous);
        let right_of_center = SensorFrame::new([0, 0, 0, 0, 1000, 0]);
        for ms in [0, 10, 20] {
            let report = control.tick(input(right_of_center, ms)).unwrap();
            assert_eq!(report.output.left.direction, MotorDirection::Forward);
            assert_eq!(report.output.right.direction, MotorDirection::Backward);
        }
    }

    #[test]
    fn local_stop_halts_any_run() {
        let mut control = control();
        control.start(OperatingMode::Supervised);
        control.tick(input(centered(), 0)).unwrap();

        let mut stop = input(centered(), 10);
        stop.local_command = Some(HostCommand::Stop);
        let report = control.tick(stop).unwrap();
        assert_eq!(report.state, NavState::Idle);
        assert_eq!(report.events.as_slice(), &[NavEvent::Stopped]);
        assert_eq!(report.output.left, WheelCommand::COAST);
    }

    #[test]
    fn networkless_mode_keeps_driving() {
        let mut control = control();
        control.start(OperatingMode::Autonomous);
        for ms in (0..1000).step_by(10) {
            let report = control.tick(input(centered(), ms)).unwrap();
            assert_eq!(report.maneuver, Maneuver::Follow);
        }
        assert_eq!(control.link().state(), LinkState::Unavailable);
    }

    #[test]
    fn drive_fault_is_reported() {
        let mut control = ControlLoop::new(
            Config::DEFAULT,
            FakeWheel {
                broken: true,
                ..Default::default()
            },
            FakeWheel::default(),
            NoRadio,
            PreferStraight,
        );
        assert_eq!(
            control.tick(input(centered(), 0)),
            Err(DriveFault::DirectionPin)
        );
    }
}
