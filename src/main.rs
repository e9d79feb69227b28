//! Line-follower firmware entry point
//!
//! Splits the peripherals, spawns the control and RC tasks, then brings up
//! the radio. The control task starts without waiting for the network.

#![no_std]
#![no_main]

use crate::task::{
    control::control,
    radio,
    rc_control::{rc_button_a_handle, rc_button_b_handle},
};
use defmt::error;
use embassy_executor::Spawner;
use embassy_rp::block::ImageDef;
use embassy_rp::config::Config;
use system::resources::{
    AssignedResources, LineSensorResources, MotorDriverResources, RCResourcesA, RCResourcesB,
    RadioResources,
};
use {defmt_rtt as _, panic_probe as _};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// System core modules
mod system;
/// Task implementations
mod task;

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Config::default());

    // Split the resources into separate groups for each task
    let r = split_resources!(p);

    spawner.spawn(rc_button_a_handle(r.rc_a)).unwrap();
    spawner.spawn(rc_button_b_handle(r.rc_b)).unwrap();
    spawner.spawn(control(r.line_sensor, r.motor_driver)).unwrap();

    // The control task runs networkless if this fails or stalls
    if let Err(e) = radio::init(spawner, r.radio).await {
        error!("RADIO: task spawn failed: {}", e);
    }
}
