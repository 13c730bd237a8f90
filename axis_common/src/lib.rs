//! # Axis Common Library
//!
//! Shared vocabulary for the axis motion-control workspace: state enums,
//! the published-field catalogue, the motor command set with its bounded
//! transaction type, the collaborator traits implemented by controller
//! bindings and host frameworks, configuration loading, and error types.
//!
//! The engine itself lives in `axis_engine`; controller bindings (such as
//! the simulator in `axis_sim`) implement [`driver::MotorController`].

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod fields;
pub mod types;
