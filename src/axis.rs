// src/axis.rs
use serde::{Deserialize, Serialize};

use crate::config::AxisConfig;
use crate::motion::JERK_MULTIPLIER;
use crate::motor::Motors;

pub const AXES: usize = 6;
pub const MOTORS: usize = 4;

/// Logical machine axes. X/Y/Z are linear, A/B/C are rotary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    A,
    B,
    C,
}

impl Axis {
    pub const ALL: [Axis; AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    pub fn from_index(i: usize) -> Option<Axis> {
        Self::ALL.get(i).copied()
    }

    pub fn from_char(c: char) -> Option<Axis> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        b"XYZABC"[self as usize] as char
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_rotary(self) -> bool {
        matches!(self, Axis::A | Axis::B | Axis::C)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomingMode {
    #[default]
    Disabled,
    StallMin,
    StallMax,
    SwitchMin,
    SwitchMax,
}

/// Per-axis limits and homing parameters.
///
/// Jerk is stored in the scaled representation (true jerk divided by
/// [`JERK_MULTIPLIER`]); the reciprocal of the unscaled value is cached at
/// set time for the planner's per-axis dominance comparisons.
#[derive(Debug, Clone)]
pub struct AxisSettings {
    pub velocity_max: f64,
    jerk_max: f64,
    recip_jerk: f64,
    pub travel_min: f64,
    pub travel_max: f64,
    pub radius: f64,
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
    pub zero_backoff: f64,
    pub homing_mode: HomingMode,
    pub homed: bool,
}

impl Default for AxisSettings {
    fn default() -> Self {
        let mut settings = Self {
            velocity_max: 0.0,
            jerk_max: 0.0,
            recip_jerk: 0.0,
            travel_min: 0.0,
            travel_max: 0.0,
            radius: 0.0,
            search_velocity: 0.0,
            latch_velocity: 0.0,
            latch_backoff: 0.0,
            zero_backoff: 0.0,
            homing_mode: HomingMode::Disabled,
            homed: false,
        };
        settings.set_jerk_max(0.0);
        settings
    }
}

impl AxisSettings {
    pub fn from_config(config: &AxisConfig) -> Self {
        let mut settings = Self {
            velocity_max: config.velocity_max,
            travel_min: config.travel_min,
            travel_max: config.travel_max,
            radius: config.radius,
            search_velocity: config.search_velocity,
            latch_velocity: config.latch_velocity,
            latch_backoff: config.latch_backoff,
            zero_backoff: config.zero_backoff,
            homing_mode: config.homing_mode,
            ..Self::default()
        };
        settings.set_jerk_max(config.jerk_max);
        settings
    }

    pub fn jerk_max(&self) -> f64 {
        self.jerk_max
    }

    pub fn recip_jerk(&self) -> f64 {
        self.recip_jerk
    }

    /// Sets the scaled jerk and caches 1 / (jerk * JERK_MULTIPLIER).
    pub fn set_jerk_max(&mut self, jerk: f64) {
        self.jerk_max = jerk;
        self.recip_jerk = if jerk == 0.0 {
            0.0
        } else {
            1.0 / (jerk * JERK_MULTIPLIER)
        };
    }
}

/// The axis table and the sparse axis-to-motor binding.
#[derive(Debug, Clone, Default)]
pub struct Axes {
    settings: [AxisSettings; AXES],
    motor_map: [Option<usize>; AXES],
}

impl Axes {
    pub fn get(&self, axis: Axis) -> &AxisSettings {
        &self.settings[axis.index()]
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut AxisSettings {
        &mut self.settings[axis.index()]
    }

    pub fn bind(&mut self, axis: Axis, motor: Option<usize>) {
        self.motor_map[axis.index()] = motor;
    }

    pub fn motor_of(&self, axis: Axis) -> Option<usize> {
        self.motor_map[axis.index()]
    }

    pub fn axis_of(&self, motor: usize) -> Option<Axis> {
        Axis::ALL
            .into_iter()
            .find(|&a| self.motor_map[a.index()] == Some(motor))
    }

    /// An axis participates in motion only when it is mapped to an enabled
    /// motor and has a nonzero velocity limit.
    pub fn is_enabled(&self, axis: Axis, motors: &Motors) -> bool {
        match self.motor_of(axis) {
            Some(motor) => motors.is_enabled(motor) && self.get(axis).velocity_max != 0.0,
            None => false,
        }
    }
}

/// Euclidean distance between two axis-space points.
pub fn vector_length(a: &[f64; AXES], b: &[f64; AXES]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
