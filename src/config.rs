//! Configuration surface
//!
//! All tunables of the cart in one place. [`Config::DEFAULT`] carries the
//! values measured on the reference vehicle (L298N-class driver, 6V motors
//! on an 11.1V pack, six analog reflectance sensors).
//!
//! # Units
//! - Sensor values: calibrated intensity, `0..=MAX_RAW` (1000 = darkest)
//! - Speeds: normalized drive units, `-255..=255`
//! - PWM: duty cycle magnitude, `0..=255`

use core::fmt;

use embassy_time::Duration;

use crate::sensor::{MAX_RAW, SENSOR_COUNT};

/// Line sensor thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorConfig {
    /// A calibrated reading strictly above this counts as black
    pub black_threshold: u16,
    /// Black sensor count at which a frame is a node (intersection bar)
    pub node_majority: usize,
}

/// Position controller gains
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Position the controller steers towards (array center)
    pub target: i32,
}

/// Per-wheel compensation
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WheelConfig {
    /// Speed matching multiplier against mechanical asymmetry (0.0 to 1.0)
    pub speed_factor: f32,
    /// Lowest duty cycle that still overcomes static friction
    pub deadband_min: u8,
}

/// Drive speeds and actuator limits
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriveConfig {
    /// Cruise speed while following the line
    pub base_speed: i16,
    /// Spin speed for turns in place
    pub turn_speed: i16,
    /// Largest wheel speed a drive intent may request
    pub max_speed: i16,
    /// Hard duty cycle ceiling, derated for the motor supply voltage
    pub max_safe_pwm: u8,
    pub left: WheelConfig,
    pub right: WheelConfig,
}

/// Navigation timing
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavConfig {
    /// Minimum time between two accepted node events
    pub node_cooldown: Duration,
    /// Open-loop spin time at the start of a turn
    pub blind_phase: Duration,
    /// Time from turn start after which following resumes regardless
    pub turn_timeout: Duration,
}

/// How the device takes part in the wireless network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkRole {
    /// Join an existing network
    Station,
    /// Host the network ourselves
    AccessPoint,
}

/// Connectivity state machine timing
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    pub role: LinkRole,
    /// Wait between join attempts
    pub join_holdoff: Duration,
    /// Time a join may take before it counts as failed
    pub join_timeout: Duration,
    /// Failed attempts tolerated before going offline
    pub max_join_attempts: u8,
    /// Time spent offline before retrying
    pub offline_hold: Duration,
    /// Interval between checks that the join is still alive
    pub liveness_interval: Duration,
    /// UDP port for commands and telemetry
    pub port: u16,
}

/// Telemetry cadence
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryConfig {
    pub interval: Duration,
}

/// Complete vehicle configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub sensor: SensorConfig,
    pub pid: PidConfig,
    pub drive: DriveConfig,
    pub nav: NavConfig,
    pub link: LinkConfig,
    pub telemetry: TelemetryConfig,
}

/// Reasons a configuration is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Black threshold leaves no room for a black reading
    BlackThresholdOutOfRange,
    /// Node majority must be between 1 and the sensor count
    NodeMajorityOutOfRange,
    /// A wheel speed factor lies outside 0.0 to 1.0
    SpeedFactorOutOfRange,
    /// A wheel deadband minimum lies above the safe PWM ceiling
    DeadbandAboveSafeLimit,
    /// Speeds must be positive and no larger than the normalized range
    SpeedOutOfRange,
    /// The blind phase must end before the turn times out
    BlindPhaseTooLong,
    /// The join retry threshold must allow at least one attempt
    NoJoinAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::BlackThresholdOutOfRange => "black threshold must be below the raw maximum",
            Self::NodeMajorityOutOfRange => "node majority must be within the sensor count",
            Self::SpeedFactorOutOfRange => "speed factor must be within 0.0..=1.0",
            Self::DeadbandAboveSafeLimit => "deadband minimum exceeds the safe PWM limit",
            Self::SpeedOutOfRange => "speeds must be within 1..=255",
            Self::BlindPhaseTooLong => "blind phase must be shorter than the turn timeout",
            Self::NoJoinAttempts => "at least one join attempt is required",
        };
        f.write_str(msg)
    }
}

impl Config {
    pub const DEFAULT: Self = Self {
        sensor: SensorConfig {
            black_threshold: 500,
            node_majority: 5,
        },
        pid: PidConfig {
            kp: 0.09,
            ki: 0.0,
            kd: 1.0,
            target: 2500,
        },
        drive: DriveConfig {
            base_speed: 90,
            turn_speed: 150,
            max_speed: 200,
            // (6V / 11.1V) * 255 ~= 138, keep some headroom
            max_safe_pwm: 120,
            left: WheelConfig {
                speed_factor: 1.0,
                deadband_min: 90,
            },
            right: WheelConfig {
                speed_factor: 0.95,
                deadband_min: 85,
            },
        },
        nav: NavConfig {
            node_cooldown: Duration::from_millis(1000),
            blind_phase: Duration::from_millis(300),
            turn_timeout: Duration::from_millis(1500),
        },
        link: LinkConfig {
            role: LinkRole::Station,
            join_holdoff: Duration::from_millis(5000),
            join_timeout: Duration::from_millis(10_000),
            max_join_attempts: 5,
            offline_hold: Duration::from_millis(30_000),
            liveness_interval: Duration::from_millis(5000),
            port: 4210,
        },
        telemetry: TelemetryConfig {
            interval: Duration::from_millis(500),
        },
    };

    /// Checks the values against each other and the hardware ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.black_threshold >= MAX_RAW {
            return Err(ConfigError::BlackThresholdOutOfRange);
        }
        if self.sensor.node_majority == 0 || self.sensor.node_majority > SENSOR_COUNT {
            return Err(ConfigError::NodeMajorityOutOfRange);
        }

        for wheel in [self.drive.left, self.drive.right] {
            if !(0.0..=1.0).contains(&wheel.speed_factor) {
                return Err(ConfigError::SpeedFactorOutOfRange);
            }
            if wheel.deadband_min > self.drive.max_safe_pwm {
                return Err(ConfigError::DeadbandAboveSafeLimit);
            }
        }

        for speed in [self.drive.base_speed, self.drive.turn_speed, self.drive.max_speed] {
            if !(1..=255).contains(&speed) {
                return Err(ConfigError::SpeedOutOfRange);
            }
        }

        if self.nav.blind_phase >= self.nav.turn_timeout {
            return Err(ConfigError::BlindPhaseTooLong);
        }
        if self.link.max_join_attempts == 0 {
            return Err(ConfigError::NoJoinAttempts);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::DEFAULT.validate(), Ok(()));
    }

    #[test]
    fn deadband_above_safe_limit_is_rejected() {
        let mut config = Config::DEFAULT;
        config.drive.right.deadband_min = 130;
        assert_eq!(config.validate(), Err(ConfigError::DeadbandAboveSafeLimit));
    }

    #[test]
    fn speed_factor_out_of_range_is_rejected() {
        let mut config = Config::DEFAULT;
        config.drive.left.speed_factor = 1.2;
        assert_eq!(config.validate(), Err(ConfigError::SpeedFactorOutOfRange));
    }

    #[test]
    fn blind_phase_must_end_before_timeout() {
        let mut config = Config::DEFAULT;
        config.nav.blind_phase = Duration::from_millis(1500);
        assert_eq!(config.validate(), Err(ConfigError::BlindPhaseTooLong));
    }

    #[test]
    fn node_majority_must_fit_the_array() {
        let mut config = Config::DEFAULT;
        config.sensor.node_majority = SENSOR_COUNT + 1;
        assert_eq!(config.validate(), Err(ConfigError::NodeMajorityOutOfRange));
        config.sensor.node_majority = 0;
        assert_eq!(config.validate(), Err(ConfigError::NodeMajorityOutOfRange));
    }
}
