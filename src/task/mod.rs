//! Firmware tasks
pub mod control;
pub mod line_sensor;
pub mod radio;
pub mod rc_control;
