// src/stepper.rs
//
// The stepper pipeline runs at a fixed segment cadence. Each tick loads the
// previously prepared move into the per-motor pulse generators, then asks
// the executor (at what would be a lower interrupt priority in hardware) to
// prepare the next one. A single prep slot gated by move_queued/move_ready
// hands segments across that priority boundary.
use crate::axis::MOTORS;
use crate::error::{ExecStatus, MotionError};
use crate::motion::{MotionCore, SEGMENT_MS};
use crate::motor::{Motors, SEGMENT_CLOCKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MoveType {
    #[default]
    Null,
    Line,
    Dwell,
}

#[derive(Debug, Clone, Default)]
pub struct Stepper {
    // Runtime
    busy: bool,
    /// Dwell seconds remaining.
    dwell: f64,

    // Move prep
    /// Prepped move ready for the loader.
    move_ready: bool,
    /// Prepped move queued by the exec path.
    move_queued: bool,
    move_type: MoveType,
    prep_dwell: f64,
}

impl Stepper {
    /// True while motors or a dwell are running.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn set_idle(&mut self) {
        self.busy = false;
    }

    pub(crate) fn move_queued(&self) -> bool {
        self.move_queued
    }

    pub(crate) fn take_queued(&mut self) {
        self.move_queued = false;
        self.move_ready = true;
    }

    /// Precomputes the next pulse segment from fractional step targets.
    /// Must not be called while a prepped move awaits the loader.
    pub fn prep_line(
        &mut self,
        motors: &mut Motors,
        max_step_rates: &[f64; MOTORS],
        targets: &[f64; MOTORS],
        now_ms: u64,
        idle_timeout_ms: u64,
    ) -> Result<(), MotionError> {
        if self.move_ready {
            return Err(MotionError::Internal);
        }

        self.move_type = MoveType::Line;

        for motor in 0..MOTORS {
            motors.get_mut(motor).prep_move(
                motor,
                targets[motor],
                max_step_rates[motor],
                now_ms,
                idle_timeout_ms,
            )?;
        }

        self.move_queued = true; // signal prep slot full, do this last
        Ok(())
    }

    /// Queues a motionless delay.
    pub fn prep_dwell(&mut self, seconds: f64) -> Result<(), MotionError> {
        if self.move_ready {
            return Err(MotionError::Internal);
        }
        self.move_type = MoveType::Dwell;
        self.prep_dwell = seconds;
        self.move_queued = true;
        Ok(())
    }

    /// E-stop path: drop everything in flight.
    pub fn shutdown(&mut self, motors: &mut Motors) {
        self.dwell = 0.0;
        self.prep_dwell = 0.0;
        self.move_type = MoveType::Null;
        self.move_ready = false;
        self.move_queued = false;
        self.busy = false;
        for motor in 0..MOTORS {
            motors.get_mut(motor).end_move();
        }
    }
}

impl MotionCore {
    /// One step-timer period. This is the hardware timer interrupt: load
    /// the prepared move (or run down a dwell), then request the next
    /// segment from the executor.
    pub fn segment_tick(&mut self) -> Result<(), MotionError> {
        self.advance_clock(SEGMENT_MS as u64);
        self.load_move()?;
        self.motors.power_callback(self.now_ms());
        Ok(())
    }

    fn load_move(&mut self) -> Result<(), MotionError> {
        use crate::motion::state::State;

        if self.state.get() == State::EStopped {
            self.stepper.move_type = MoveType::Null;
            self.end_moves();
            return Ok(());
        }

        // Dwell runs down one segment per tick
        if 0.0 < self.stepper.dwell {
            self.stepper.dwell -= SEGMENT_MS / 1000.0;
            return Ok(());
        }
        self.stepper.dwell = 0.0;

        // Nothing prepped: ask the executor and emit nothing this segment
        if !self.stepper.move_ready {
            self.request_exec()?;
            self.end_moves();
            return Ok(());
        }

        if self.stepper.move_type == MoveType::Line {
            for motor in 0..MOTORS {
                self.motors.get_mut(motor).load_move(SEGMENT_CLOCKS);
            }
        } else {
            self.end_moves();
        }

        if self.stepper.move_type != MoveType::Null {
            self.stepper.busy = true;
            self.stepper.dwell = self.stepper.prep_dwell;
        }

        self.stepper.move_type = MoveType::Null;
        self.stepper.prep_dwell = 0.0;
        self.stepper.move_ready = false;

        // Prep the next move now unless dwelling; motors must stay
        // unpowered during a dwell.
        if self.stepper.dwell == 0.0 {
            self.request_exec()?;
        }

        Ok(())
    }

    /// The low-priority exec request: run the executor until it either
    /// preps a move, runs dry, or fails.
    fn request_exec(&mut self) -> Result<(), MotionError> {
        loop {
            match self.exec_move() {
                Ok(ExecStatus::Noop) | Ok(ExecStatus::MinimumTime) => {
                    self.stepper.set_idle();
                    return Ok(());
                }
                Ok(ExecStatus::Again) => continue,
                Ok(ExecStatus::Done) => {
                    if !self.stepper.move_queued() {
                        return Err(self.alarm(MotionError::ExpectedMove));
                    }
                    self.stepper.take_queued();
                    return Ok(());
                }
                Err(error) => return Err(self.alarm(error)),
            }
        }
    }

    fn end_moves(&mut self) {
        for motor in 0..MOTORS {
            self.motors.get_mut(motor).end_move();
        }
    }
}
