//! Control Task
//!
//! Runs the whole line-follower control loop at 100 Hz: calibrate the
//! sensors once, then read, decide and drive every tick. Network traffic
//! and RC buttons reach this task only through non-blocking queues, so a
//! slow join never delays a tick.

use crate::system::resources::{LineSensorResources, MotorDriverResources};
use crate::system::run_command;
use crate::task::line_sensor::LineSensor;
use crate::task::radio::{self, Cyw43Radio};
use defmt::{error, info, warn};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::pwm::{self, Pwm};
use embassy_time::{Duration, Instant, Ticker};
use line_follower::config::Config;
use line_follower::control::{ControlLoop, TickInput};
use line_follower::drive::WheelPins;
use line_follower::navigator::PreferStraight;

/// Control loop period
const TICK: Duration = Duration::from_millis(10);

/// How long to wait for the radio before running without network
const RADIO_STARTUP: Duration = Duration::from_secs(10);

/// L298N enable frequency
const PWM_FREQ_HZ: u32 = 1_000;

type Wheel = WheelPins<Output<'static>, Output<'static>, Pwm<'static>>;

#[embassy_executor::task]
pub async fn control(sensor: LineSensorResources, motors: MotorDriverResources) {
    let mut config = Config::DEFAULT;
    config.link.role = radio::ROLE;
    if let Err(e) = config.validate() {
        error!("CTRL: configuration rejected: {}", e);
        return;
    }

    let (left, right) = wheels(motors);
    let mut sensor = LineSensor::new(sensor);
    let calibration = sensor.calibrate().await;

    if !radio::wait_ready(RADIO_STARTUP).await {
        warn!("CTRL: no radio, continuing without network");
    }

    let mut control = ControlLoop::new(config, left, right, Cyw43Radio, PreferStraight);
    info!("CTRL: ready, press A (autonomous) or B (supervised) to start");

    let mut ticker = Ticker::every(TICK);
    loop {
        let raw = sensor.read_raw().await;
        let input = TickInput {
            frame: calibration.normalize(&raw),
            // sonar is not fitted
            distance_cm: 0.0,
            local_command: run_command::try_take(),
            now: Instant::now(),
        };

        if let Err(e) = control.tick(input) {
            error!("CTRL: drive fault: {}", e);
        }
        ticker.next().await;
    }
}

/// Sets up both motor channels, stopped
fn wheels(r: MotorDriverResources) -> (Wheel, Wheel) {
    let clock_freq_hz = embassy_rp::clocks::clk_sys_freq(); // 150MHz

    // Calculate minimum divider needed to keep period under 16-bit limit (65535)
    let divider = ((clock_freq_hz / PWM_FREQ_HZ) / 65535 + 1) as u8;
    let period = (clock_freq_hz / (PWM_FREQ_HZ * divider as u32)) as u16 - 1;

    let mut pwm_config = pwm::Config::default();
    pwm_config.divider = divider.into();
    pwm_config.top = period;
    pwm_config.compare_a = 0;

    let left = WheelPins::new(
        Output::new(r.left_forward_pin, Level::Low),
        Output::new(r.left_backward_pin, Level::Low),
        Pwm::new_output_a(r.left_slice, r.left_pwm_pin, pwm_config.clone()),
    );
    let right = WheelPins::new(
        Output::new(r.right_forward_pin, Level::Low),
        Output::new(r.right_backward_pin, Level::Low),
        Pwm::new_output_a(r.right_slice, r.right_pwm_pin, pwm_config),
    );
    (left, right)
}
