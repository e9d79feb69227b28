//! Hardware Resource Management
//!
//! Splits the RP2350 peripherals into per-task groups so every pin has
//! exactly one owner.
//!
//! # Resource Groups
//! - Line Sensor: six reflectance sensors behind a 74HC4051 analog mux,
//!   read through one ADC input, plus the emitter enable
//! - Motor Control: L298N enable (PWM) and direction pins for both motors
//! - RC Control: remote control button inputs
//! - Radio: CYW43439 SPI pins driven by PIO0

use assign_resources::assign_resources;
use embassy_rp::adc::InterruptHandler as AdcInterruptHandler;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{self, PIO0};
use embassy_rp::pio::InterruptHandler as PioInterruptHandler;

assign_resources! {
    /// Reflectance sensor array behind an 8:1 analog mux
    line_sensor: LineSensorResources {
        adc: ADC,
        mux_out: PIN_26,
        select_0: PIN_2,
        select_1: PIN_3,
        select_2: PIN_4,
        emitter: PIN_5,
    },
    /// L298N dual H-bridge
    motor_driver: MotorDriverResources {
        // ENA on GPIO 6 is PWM slice 3 channel A
        left_slice: PWM_SLICE3,
        left_pwm_pin: PIN_6,
        left_forward_pin: PIN_10,
        left_backward_pin: PIN_11,
        // ENB on GPIO 8 is PWM slice 4 channel A
        right_slice: PWM_SLICE4,
        right_pwm_pin: PIN_8,
        right_forward_pin: PIN_12,
        right_backward_pin: PIN_13,
    },
    /// Remote control button A
    rc_a: RCResourcesA {
        btn_a: PIN_16,
    },
    /// Remote control button B
    rc_b: RCResourcesB {
        btn_b: PIN_17,
    },
    /// On-board CYW43439 wireless chip
    radio: RadioResources {
        pwr: PIN_23,
        dio: PIN_24,
        cs: PIN_25,
        clk: PIN_29,
        pio: PIO0,
        dma: DMA_CH0,
    },
}

bind_interrupts!(pub struct Irqs {
    ADC_IRQ_FIFO => AdcInterruptHandler;
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
});
