//! Run Command Module
//!
//! Hands start/stop requests from the RC buttons to the control task.
//! Only the latest request is kept; the control task picks it up on its next
//! tick without waiting.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use line_follower::command::HostCommand;

/// Latest local run request
static RUN_COMMAND: Signal<CriticalSectionRawMutex, HostCommand> = Signal::new();

/// Posts a run request, replacing one not yet picked up
pub fn signal(command: HostCommand) {
    RUN_COMMAND.signal(command);
}

/// Takes the pending run request, if any
pub fn try_take() -> Option<HostCommand> {
    RUN_COMMAND.try_take()
}
