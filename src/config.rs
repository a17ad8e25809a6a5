// src/config.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::axis::HomingMode;
use crate::motor::PowerMode;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub axes: HashMap<String, AxisConfig>,
    #[serde(default)]
    pub motors: Vec<MotorConfig>,
}

/// Global planner tuning. All values have working defaults so a minimal
/// config file only needs the axis and motor tables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Junction deviation in mm. Larger values corner faster.
    pub junction_deviation: f64,
    /// Centripetal acceleration budget for cornering, in mm/min^2.
    pub junction_acceleration: f64,
    /// Seconds a powered-in-cycle motor stays energized after its last move.
    pub motor_idle_timeout: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            junction_deviation: 0.05,
            junction_acceleration: 200_000.0,
            motor_idle_timeout: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Max velocity in mm/min (deg/min for rotary axes).
    pub velocity_max: f64,
    /// Max jerk in mm/min^3, scaled down by 1e6.
    pub jerk_max: f64,
    pub travel_min: f64,
    pub travel_max: f64,
    /// Radius used to convert rotary travel to linear equivalence.
    pub radius: f64,
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
    pub zero_backoff: f64,
    pub homing_mode: HomingMode,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            velocity_max: 5000.0,
            jerk_max: 50.0,
            travel_min: 0.0,
            travel_max: 0.0,
            radius: 0.0,
            search_velocity: 500.0,
            latch_velocity: 100.0,
            latch_backoff: 5.0,
            zero_backoff: 1.0,
            homing_mode: HomingMode::Disabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    /// Logical axis this motor drives, as a letter: X Y Z A B C.
    pub axis: char,
    #[serde(default = "default_microsteps")]
    pub microsteps: u16,
    #[serde(default = "default_step_angle")]
    pub step_angle: f64,
    /// Travel in mm (or deg) per motor revolution.
    #[serde(default = "default_travel_per_rev")]
    pub travel_per_rev: f64,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub power_mode: PowerMode,
}

fn default_microsteps() -> u16 {
    32
}

fn default_step_angle() -> f64 {
    1.8
}

fn default_travel_per_rev() -> f64 {
    5.0
}

pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_round_trip() {
        let toml = r#"
            [planner]
            junction_deviation = 0.1

            [axes.x]
            velocity_max = 10000.0
            jerk_max = 20.0
            travel_max = 300.0

            [[motors]]
            axis = "X"
            microsteps = 16
        "#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.planner.junction_deviation, 0.1);
        assert_eq!(config.planner.junction_acceleration, 200_000.0);
        assert_eq!(config.axes["x"].travel_max, 300.0);
        assert_eq!(config.motors[0].microsteps, 16);
        assert!(!config.motors[0].reverse);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.planner.motor_idle_timeout, 2.0);
        assert!(config.motors.is_empty());
    }
}
