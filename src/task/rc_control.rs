//! RC button handling
//!
//! Turns RC button presses into run commands:
//! - A press: start an autonomous run
//! - B press: start a supervised run (node decisions come from the host)
//! - hold either: stop, so the same button that started a run can end it

use crate::system::resources::{RCResourcesA, RCResourcesB};
use crate::system::run_command;
use defmt::info;
use embassy_rp::gpio::{Input, Level, Pull};
use embassy_time::{with_timeout, Duration, TimeoutError, Timer};
use line_follower::command::HostCommand;

/// Button hold threshold (ms)
const HOLD_DURATION: Duration = Duration::from_millis(700);

/// Button debounce delay (ms)
const DEBOUNCE_DURATION: Duration = Duration::from_millis(30);

/// Button A handler
#[embassy_executor::task]
pub async fn rc_button_a_handle(r: RCResourcesA) {
    let mut btn = Input::new(r.btn_a, Pull::Down);
    handle_button(&mut btn, HostCommand::StartAutonomous).await;
}

/// Button B handler
#[embassy_executor::task]
pub async fn rc_button_b_handle(r: RCResourcesB) {
    let mut btn = Input::new(r.btn_b, Pull::Down);
    handle_button(&mut btn, HostCommand::Start).await;
}

/// How long the button stayed down
enum Press {
    Short,
    Held,
}

impl Press {
    /// A hold always stops, whichever button it was
    fn command(self, on_press: HostCommand) -> HostCommand {
        match self {
            Press::Short => on_press,
            Press::Held => HostCommand::Stop,
        }
    }
}

/// Posts the run command for each press
async fn handle_button(button: &mut Input<'static>, on_press: HostCommand) {
    loop {
        if settled_level(button).await != Level::High {
            continue;
        }

        let press = match with_timeout(HOLD_DURATION, settled_level(button)).await {
            Ok(_) => Press::Short,
            Err(TimeoutError) => Press::Held,
        };
        let command = press.command(on_press);
        info!("RC: {}", command);
        run_command::signal(command);

        if button.is_high() {
            button.wait_for_low().await;
        }
    }
}

/// Waits for the next edge that survives the debounce delay
async fn settled_level(button: &mut Input<'static>) -> Level {
    loop {
        let before = button.get_level();
        button.wait_for_any_edge().await;
        Timer::after(DEBOUNCE_DURATION).await;
        let after = button.get_level();
        if after != before {
            return after;
        }
    }
}
