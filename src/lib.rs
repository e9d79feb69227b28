//! Line-follower control core
//!
//! Everything that decides how the cart moves lives here and is free of
//! hardware: sensor classification, the position PID, the differential
//! drive pipeline, navigation, and the network link state machine. The
//! firmware binary (`src/main.rs`) binds these to RP2350 peripherals.
//!
//! # Per-tick data flow
//! ```text
//! raw samples -> LineClassifier -> (position, pattern)
//!             -> Navigator (+ pending host command) -> Maneuver
//!             -> PositionController (when following) -> DifferentialDrive
//! ConnectivityManager ticks alongside and carries commands/telemetry.
//! ```

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible in every module below.
mod fmt;

pub mod command;
pub mod config;
pub mod control;
pub mod drive;
pub mod link;
pub mod navigator;
pub mod pid;
pub mod sensor;
pub mod telemetry;
