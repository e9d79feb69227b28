//! Differential drive
//!
//! Turns a pair of normalized wheel speeds into direction pin levels and a
//! duty cycle for each motor of an H-bridge driver (L298N / TB6612FNG style:
//! one PWM enable line and two direction lines per motor).
//!
//! # Per-wheel pipeline
//! 1. Multiply by the wheel's speed matching factor
//! 2. Remap any nonzero magnitude from `0..=255` onto
//!    `deadband_min..=max_safe_pwm`, so the motor never receives a duty
//!    cycle too low to overcome static friction
//! 3. Clamp to `max_safe_pwm`
//! 4. Sign selects the direction pins; exactly zero coasts (both pins low,
//!    duty zero)
//!
//! Both wheels have their own factor and deadband, so each one runs through
//! the pipeline independently.

use core::fmt;

use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal::pwm::SetDutyCycle;

use crate::config::{DriveConfig, WheelConfig};
use crate::navigator::Direction;

/// Full scale of the normalized speed and duty cycle range
pub const PWM_RANGE: u16 = 255;

/// Left/right wheel speeds in normalized units, before compensation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveIntent {
    pub left: i16,
    pub right: i16,
}

impl DriveIntent {
    pub const STOP: Self = Self { left: 0, right: 0 };

    pub const fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    /// Limits both wheels to `-max..=max`
    pub fn clamped(self, max: i16) -> Self {
        let max = max.abs();
        Self {
            left: self.left.clamp(-max, max),
            right: self.right.clamp(-max, max),
        }
    }
}

/// Motor direction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorDirection {
    Forward,
    Backward,
    /// Both pins low - freewheeling
    Coast,
}

/// Compensated command for one wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WheelCommand {
    pub direction: MotorDirection,
    /// Duty cycle magnitude, `0..=255`
    pub duty: u8,
}

impl WheelCommand {
    pub const COAST: Self = Self {
        direction: MotorDirection::Coast,
        duty: 0,
    };
}

/// Runs one wheel speed through the compensation pipeline
pub fn compensate(speed: i16, wheel: &WheelConfig, max_safe_pwm: u8) -> WheelCommand {
    let scaled = f32::from(speed) * wheel.speed_factor;
    if scaled == 0.0 {
        return WheelCommand::COAST;
    }

    let min = f32::from(wheel.deadband_min);
    let max = f32::from(max_safe_pwm);
    let remapped = min + libm::fabsf(scaled) * (max - min) / f32::from(PWM_RANGE);

    // Never below the deadband, never above the safety limit.
    let duty = (remapped as u16)
        .max(u16::from(wheel.deadband_min))
        .min(u16::from(max_safe_pwm));

    WheelCommand {
        direction: if scaled > 0.0 {
            MotorDirection::Forward
        } else {
            MotorDirection::Backward
        },
        duty: duty as u8,
    }
}

/// Failed write to the motor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveFault {
    /// A direction line could not be set
    DirectionPin,
    /// The enable line rejected the duty cycle
    DutyCycle,
}

impl fmt::Display for DriveFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectionPin => f.write_str("direction pin write failed"),
            Self::DutyCycle => f.write_str("duty cycle write failed"),
        }
    }
}

/// Something that can execute a [`WheelCommand`]
pub trait WheelOutput {
    fn apply(&mut self, command: WheelCommand) -> Result<(), DriveFault>;
}

/// Pin triple driving one motor
pub struct WheelPins<F, R, E> {
    forward: F,
    reverse: R,
    enable: E,
}

impl<F, R, E> WheelPins<F, R, E>
where
    F: OutputPin,
    R: OutputPin,
    E: SetDutyCycle,
{
    pub fn new(forward: F, reverse: R, enable: E) -> Self {
        Self {
            forward,
            reverse,
            enable,
        }
    }
}

impl<F, R, E> WheelOutput for WheelPins<F, R, E>
where
    F: OutputPin,
    R: OutputPin,
    E: SetDutyCycle,
{
    fn apply(&mut self, command: WheelCommand) -> Result<(), DriveFault> {
        let (forward, reverse) = match command.direction {
            MotorDirection::Forward => (PinState::High, PinState::Low),
            MotorDirection::Backward => (PinState::Low, PinState::High),
            MotorDirection::Coast => (PinState::Low, PinState::Low),
        };
        self.forward
            .set_state(forward)
            .map_err(|_| DriveFault::DirectionPin)?;
        self.reverse
            .set_state(reverse)
            .map_err(|_| DriveFault::DirectionPin)?;
        self.enable
            .set_duty_cycle_fraction(u16::from(command.duty), PWM_RANGE)
            .map_err(|_| DriveFault::DutyCycle)
    }
}

/// Output of one drive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveOutput {
    pub left: WheelCommand,
    pub right: WheelCommand,
}

/// Two compensated wheels
pub struct DifferentialDrive<L, R> {
    left: L,
    right: R,
    config: DriveConfig,
    last: DriveOutput,
}

impl<L, R> DifferentialDrive<L, R>
where
    L: WheelOutput,
    R: WheelOutput,
{
    pub fn new(left: L, right: R, config: DriveConfig) -> Self {
        Self {
            left,
            right,
            config,
            last: DriveOutput {
                left: WheelCommand::COAST,
                right: WheelCommand::COAST,
            },
        }
    }

    /// Compensates and issues both wheel speeds
    pub fn drive(&mut self, left: i16, right: i16) -> Result<DriveOutput, DriveFault> {
        let output = DriveOutput {
            left: compensate(left, &self.config.left, self.config.max_safe_pwm),
            right: compensate(right, &self.config.right, self.config.max_safe_pwm),
        };

        if output != self.last {
            debug!("drive L:{} R:{} -> {:?}", left, right, output);
        }

        self.left.apply(output.left)?;
        self.right.apply(output.right)?;
        self.last = output;
        Ok(output)
    }

    pub fn apply(&mut self, intent: DriveIntent) -> Result<DriveOutput, DriveFault> {
        self.drive(intent.left, intent.right)
    }

    /// Coasts both wheels
    pub fn stop(&mut self) -> Result<DriveOutput, DriveFault> {
        self.drive(0, 0)
    }

    pub fn forward(&mut self, speed: i16) -> Result<DriveOutput, DriveFault> {
        self.drive(speed, speed)
    }

    /// Spins on the spot towards `direction`
    ///
    /// `Down` spins right (U-turn); `Up` and `None` stop.
    pub fn turn_in_place(
        &mut self,
        direction: Direction,
        speed: i16,
    ) -> Result<DriveOutput, DriveFault> {
        match direction {
            Direction::Left => self.drive(-speed, speed),
            Direction::Right | Direction::Down => self.drive(speed, -speed),
            Direction::Up | Direction::None => self.stop(),
        }
    }

    /// Last commands issued to the wheels
    pub fn last_output(&self) -> DriveOutput {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use embedded_hal::{digital, pwm};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Probe {
        forward: Rc<Cell<bool>>,
        reverse: Rc<Cell<bool>>,
        duty: Rc<Cell<u16>>,
    }

    struct FakePin {
        level: Rc<Cell<bool>>,
        broken: bool,
    }

    impl digital::ErrorType for FakePin {
        type Error = digital::ErrorKind;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(digital::ErrorKind::Other);
            }
            self.level.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if self.broken {
                return Err(digital::ErrorKind::Other);
            }
            self.level.set(true);
            Ok(())
        }
    }

    struct FakePwm {
        duty: Rc<Cell<u16>>,
    }

    impl pwm::ErrorType for FakePwm {
        type Error = pwm::ErrorKind;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            PWM_RANGE
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty.set(duty);
            Ok(())
        }
    }

    fn wheel(probe: &Probe) -> WheelPins<FakePin, FakePin, FakePwm> {
        WheelPins::new(
            FakePin {
                level: probe.forward.clone(),
                broken: false,
            },
            FakePin {
                level: probe.reverse.clone(),
                broken: false,
            },
            FakePwm {
                duty: probe.duty.clone(),
            },
        )
    }

    type TestDrive = DifferentialDrive<
        WheelPins<FakePin, FakePin, FakePwm>,
        WheelPins<FakePin, FakePin, FakePwm>,
    >;

    fn drive() -> (TestDrive, Probe, Probe) {
        let (left, right) = (Probe::default(), Probe::default());
        let drive = DifferentialDrive::new(wheel(&left), wheel(&right), Config::DEFAULT.drive);
        (drive, left, right)
    }

    fn assert_coasting(probe: &Probe) {
        assert!(!probe.forward.get());
        assert!(!probe.reverse.get());
        assert_eq!(probe.duty.get(), 0);
    }

    #[test]
    fn zero_speed_coasts_from_any_state() {
        let (mut drive, left, right) = drive();
        for (l, r) in [(200, -200), (-90, 35), (255, 255), (0, 0)] {
            drive.drive(l, r).unwrap();
            let output = drive.drive(0, 0).unwrap();
            assert_eq!(output.left, WheelCommand::COAST);
            assert_eq!(output.right, WheelCommand::COAST);
            assert_coasting(&left);
            assert_coasting(&right);
        }
    }

    #[test]
    fn nonzero_speed_stays_within_deadband_and_safety_limit() {
        let config = Config::DEFAULT.drive;
        for speed in -600i16..=600 {
            if speed == 0 {
                continue;
            }
            for wheel in [config.left, config.right] {
                let command = compensate(speed, &wheel, config.max_safe_pwm);
                assert!(command.duty >= wheel.deadband_min, "speed {}", speed);
                assert!(command.duty <= config.max_safe_pwm, "speed {}", speed);
                assert_ne!(command.direction, MotorDirection::Coast);
            }
        }
    }

    #[test]
    fn wheels_are_compensated_independently() {
        let config = Config::DEFAULT.drive;
        // left: factor 1.0, min 90 -> 90 + 255 * 30 / 255
        let left = compensate(255, &config.left, config.max_safe_pwm);
        assert_eq!(left.duty, 120);
        // right: factor 0.95, min 85 -> 85 + 242.25 * 35 / 255 = 118.25
        let right = compensate(255, &config.right, config.max_safe_pwm);
        assert_eq!(right.duty, 118);
        // smallest request lands on each wheel's own deadband
        assert_eq!(compensate(1, &config.left, config.max_safe_pwm).duty, 90);
        assert_eq!(compensate(1, &config.right, config.max_safe_pwm).duty, 85);
    }

    #[test]
    fn sign_selects_direction_pins() {
        let (mut drive, left, right) = drive();
        drive.drive(100, -100).unwrap();
        assert!(left.forward.get() && !left.reverse.get());
        assert!(!right.forward.get() && right.reverse.get());
        assert!(left.duty.get() >= 90);
        assert!(right.duty.get() >= 85);
    }

    #[test]
    fn zero_factor_disables_wheel() {
        let mut config = Config::DEFAULT.drive;
        config.left.speed_factor = 0.0;
        assert_eq!(compensate(200, &config.left, config.max_safe_pwm), WheelCommand::COAST);
    }

    #[test]
    fn turn_in_place_spins_opposite() {
        let (mut drive, _, _) = drive();
        let output = drive.turn_in_place(Direction::Left, 150).unwrap();
        assert_eq!(output.left.direction, MotorDirection::Backward);
        assert_eq!(output.right.direction, MotorDirection::Forward);

        let output = drive.turn_in_place(Direction::Down, 150).unwrap();
        assert_eq!(output.left.direction, MotorDirection::Forward);
        assert_eq!(output.right.direction, MotorDirection::Backward);

        let output = drive.turn_in_place(Direction::None, 150).unwrap();
        assert_eq!(output.left, WheelCommand::COAST);
        assert_eq!(drive.last_output(), output);
    }

    #[test]
    fn pin_failure_is_reported() {
        let probe = Probe::default();
        let broken = WheelPins::new(
            FakePin {
                level: probe.forward.clone(),
                broken: true,
            },
            FakePin {
                level: probe.reverse.clone(),
                broken: false,
            },
            FakePwm {
                duty: probe.duty.clone(),
            },
        );
        let mut drive = DifferentialDrive::new(broken, wheel(&Probe::default()), Config::DEFAULT.drive);
        assert_eq!(drive.forward(100), Err(DriveFault::DirectionPin));
    }

    #[test]
    fn intent_clamping() {
        let intent = DriveIntent::new(400, -300).clamped(200);
        assert_eq!(intent, DriveIntent::new(200, -200));
    }
}
