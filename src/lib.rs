// src/lib.rs
pub mod axis;
pub mod calibrate;
pub mod config;
pub mod controller;
pub mod error;
pub mod homing;
pub mod kinematics;
pub mod machine;
pub mod motion;
pub mod motor;
pub mod report;
pub mod stepper;
pub mod switch;

pub use axis::{AXES, Axis, MOTORS};
pub use config::{Config, load_config};
pub use controller::{Command, Controller};
pub use error::{ExecStatus, MotionError};
pub use machine::Machine;
pub use motion::MotionCore;
pub use report::StatusReport;
