// src/error.rs
use thiserror::Error;

/// Non-fatal statuses threaded through the executor and stepper pipeline.
///
/// These are flow control, not failures: the step timer uses them to decide
/// whether a move was prepped, whether to call the executor again, or whether
/// the queue is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The current block completed on this call.
    Done,
    /// A segment was emitted and the block has more segments to run.
    Again,
    /// Nothing to do (empty queue, hold, zero-length section).
    Noop,
    /// The segment would be shorter than the minimum segment time.
    /// Position is not advanced; the length accumulates into the next move.
    MinimumTime,
}

/// Fatal conditions. Anything here ends the current move and, for motor
/// faults and internal errors, escalates to an e-stop alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MotionError {
    #[error("move target is NaN")]
    MoveTargetNan,
    #[error("move target is infinite")]
    MoveTargetInfinite,
    #[error("expected a prepared move but none was queued")]
    ExpectedMove,
    #[error("internal planner error")]
    Internal,
    #[error("machine is e-stopped")]
    EStopped,
    #[error("soft limit exceeded on {0} axis")]
    SoftLimit(char),
    #[error("feed rate is zero or unset")]
    ZeroFeedRate,

    #[error("homing cycle failed")]
    HomingFailed,
    #[error("no axis or bad axis specified for homing")]
    HomingBadAxis,
    #[error("homing search velocity is zero")]
    HomingZeroSearchVelocity,
    #[error("homing latch velocity is zero")]
    HomingZeroLatchVelocity,
    #[error("homing latch backoff is negative")]
    HomingNegativeLatchBackoff,
    #[error("axis travel min and max are identical")]
    HomingTravelMinMaxIdentical,

    #[error("motor {0} stalled")]
    MotorStalled(usize),
    #[error("motor {0} over temperature")]
    MotorOverTemp(usize),
    #[error("motor {0} over current")]
    MotorOverCurrent(usize),
    #[error("motor {0} driver fault")]
    MotorDriverFault(usize),
    #[error("motor {0} under voltage")]
    MotorUnderVoltage(usize),
}

/// Result of one executor or stepper pipeline call.
pub type MotionResult = Result<ExecStatus, MotionError>;
