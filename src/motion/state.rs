// src/motion/state.rs
//
// The global planner state machine and the cycle arbitration. Request flags
// are set from anywhere (console, switches, program flow) and reconciled
// once per main-loop pass by `MotionCore::state_callback` in mod.rs; the
// rules live in the doc comment there.
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Ready,
    EStopped,
    Running,
    Stopping,
    Holding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cycle {
    Machining,
    Homing,
    Probing,
    Calibrating,
    Jogging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldReason {
    UserPause,
    ProgramPause,
    ProgramEnd,
    PalletChange,
    ToolChange,
}

#[derive(Debug, Clone)]
pub struct PlannerState {
    state: State,
    cycle: Cycle,
    hold_reason: HoldReason,

    pub(crate) hold_requested: bool,
    pub(crate) hold_reason_request: Option<HoldReason>,
    pub(crate) flush_requested: bool,
    pub(crate) start_requested: bool,
    pub(crate) resume_requested: bool,
    pub(crate) optional_pause_requested: bool,
}

impl Default for PlannerState {
    fn default() -> Self {
        Self {
            state: State::Ready,
            cycle: Cycle::Machining,
            hold_reason: HoldReason::UserPause,
            hold_requested: false,
            hold_reason_request: None,
            // Start out flushing, matching a power-on queue purge
            flush_requested: true,
            start_requested: false,
            resume_requested: false,
            optional_pause_requested: false,
        }
    }
}

impl PlannerState {
    pub fn get(&self) -> State {
        self.state
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn hold_reason(&self) -> HoldReason {
        self.hold_reason
    }

    pub fn set_hold_reason(&mut self, reason: HoldReason) {
        self.hold_reason = reason;
    }

    /// ESTOPPED is terminal; all other transitions go through here.
    fn set(&mut self, state: State) {
        if self.state == state || self.state == State::EStopped {
            return;
        }
        tracing::info!(from = ?self.state, to = ?state, "planner state");
        self.state = state;
    }

    /// Only MACHINING may transition to another cycle and vice versa, and
    /// only while READY. Anything else is an internal error.
    pub fn set_cycle(&mut self, cycle: Cycle) -> Result<(), crate::error::MotionError> {
        if self.cycle == cycle {
            return Ok(());
        }

        if self.state != State::Ready && cycle != Cycle::Machining {
            tracing::error!(?cycle, state = ?self.state, "cannot enter cycle in this state");
            return Err(crate::error::MotionError::Internal);
        }

        if self.cycle != Cycle::Machining && cycle != Cycle::Machining {
            tracing::error!(from = ?self.cycle, to = ?cycle, "illegal cycle transition");
            return Err(crate::error::MotionError::Internal);
        }

        tracing::info!(from = ?self.cycle, to = ?cycle, "cycle");
        self.cycle = cycle;
        Ok(())
    }

    pub fn holding(&mut self) {
        self.set(State::Holding);
    }

    pub fn stopping(&mut self) {
        self.set(State::Stopping);
    }

    /// READY -> RUNNING on the first committed block.
    pub fn running(&mut self) {
        if self.state == State::Ready {
            self.set(State::Running);
        }
    }

    /// RUNNING -> READY when the queue drains.
    pub fn idle(&mut self) {
        if self.state == State::Running {
            self.set(State::Ready);
        }
    }

    pub fn resume_running(&mut self) {
        if self.state == State::Holding {
            self.set(State::Running);
        }
    }

    pub fn resume_ready(&mut self) {
        if self.state == State::Holding {
            self.set(State::Ready);
        }
    }

    pub fn estop(&mut self) {
        self.set(State::EStopped);
    }

    // Request flags; all idempotent.

    pub fn request_hold(&mut self) {
        self.hold_requested = true;
    }

    /// Hold with a specific reason, for program-flow stops.
    pub fn request_hold_with(&mut self, reason: HoldReason) {
        self.hold_requested = true;
        self.hold_reason_request = Some(reason);
    }

    pub fn request_start(&mut self) {
        self.start_requested = true;
    }

    pub fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    /// Resume only makes sense while a flush is pending; it re-arms the
    /// machine once the flush completes.
    pub fn request_resume(&mut self) {
        if self.flush_requested {
            self.resume_requested = true;
        }
    }

    pub fn request_optional_pause(&mut self) {
        self.optional_pause_requested = true;
    }

    pub fn is_flushing(&self) -> bool {
        self.flush_requested && !self.resume_requested
    }

    pub fn is_resuming(&self) -> bool {
        self.resume_requested
    }
}
