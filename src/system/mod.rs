//! Core system components shared between tasks
pub mod resources;
pub mod run_command;
