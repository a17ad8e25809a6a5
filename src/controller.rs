// src/controller.rs
//
// Async orchestration around the synchronous motion core. Two background
// tasks stand in for the firmware's interrupt levels: the segment clock
// drives the stepper pipeline at the segment period, and the main loop runs
// state reconciliation, cycle callbacks and status reports. Commands arrive
// over an mpsc channel.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::axis::AXES;
use crate::error::MotionError;
use crate::machine::Machine;
use crate::motion::SEGMENT_MS;
use crate::motor::MotorFlags;
use crate::report::Reporter;
use crate::switch::SwitchId;

#[derive(Debug, Clone)]
pub enum Command {
    Rapid([Option<f64>; AXES]),
    Feed([Option<f64>; AXES]),
    /// Move with an inline F word: (axis words, feed rate, rapid).
    FeedWithRate([Option<f64>; AXES], f64, bool),
    SetFeedRate(f64),
    Dwell(f64),
    Jog([f64; AXES]),
    Home([bool; AXES]),
    Hold,
    Start,
    Flush,
    Resume,
    OptionalPause,
    Step,
    EStop,
    Switch(SwitchId, bool),
    /// Driver-reported fault flags for one motor.
    MotorFault(usize, MotorFlags),
    /// Clear latched fault flags for one motor, or all when None.
    MotorReset(Option<usize>),
}

pub struct Controller {
    machine: Arc<Mutex<Machine>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: Option<mpsc::Receiver<Command>>,
}

impl Controller {
    pub fn new(machine: Machine) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        Self {
            machine: Arc::new(Mutex::new(machine)),
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn machine(&self) -> Arc<Mutex<Machine>> {
        self.machine.clone()
    }

    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.command_tx.clone()
    }

    /// Starts the segment clock and main-loop tasks.
    pub fn start(&mut self) {
        let machine = self.machine.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(SEGMENT_MS as u64));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let mut machine = machine.lock().await;
                if let Err(error) = machine.core.segment_tick() {
                    tracing::error!(%error, "segment tick failed");
                }
            }
        });

        let machine = self.machine.clone();
        let Some(mut command_rx) = self.command_rx.take() else {
            tracing::error!("controller already started");
            return;
        };
        tokio::spawn(async move {
            let mut reporter = Reporter::default();
            let mut interval = tokio::time::interval(Duration::from_millis(10));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut machine = machine.lock().await;
                        machine.main_loop();
                        if let Some(report) = reporter.update(&machine) {
                            println!("{report}");
                        }
                    }
                    command = command_rx.recv() => {
                        let Some(command) = command else { break };

                        // Moves respect ring back-pressure: wait for
                        // headroom while the segment clock drains the
                        // queue. This is the one blocking point in the
                        // pipeline, the async analogue of the firmware
                        // busy-waiting on a free planner slot.
                        loop {
                            {
                                let mut machine = machine.lock().await;
                                if !needs_room(&command)
                                    || machine.core.queue.room() > 0
                                {
                                    if let Err(error) =
                                        dispatch(&mut machine, command.clone())
                                    {
                                        tracing::warn!(%error, "command failed");
                                    }
                                    break;
                                }
                            }
                            tokio::time::sleep(
                                Duration::from_millis(SEGMENT_MS as u64),
                            )
                            .await;
                        }
                    }
                }
            }
        });
    }
}

fn needs_room(command: &Command) -> bool {
    matches!(
        command,
        Command::Rapid(_)
            | Command::Feed(_)
            | Command::FeedWithRate(..)
            | Command::Dwell(_)
    )
}

fn dispatch(machine: &mut Machine, command: Command) -> Result<(), MotionError> {
    match command {
        Command::Rapid(values) => machine.rapid(&values),
        Command::Feed(values) => machine.feed(&values),
        Command::FeedWithRate(values, rate, rapid) => {
            machine.set_feed_rate(rate);
            if rapid {
                machine.rapid(&values)
            } else {
                machine.feed(&values)
            }
        }
        Command::SetFeedRate(rate) => {
            machine.set_feed_rate(rate);
            Ok(())
        }
        Command::Dwell(seconds) => machine.dwell(seconds),
        Command::Jog(velocities) => machine.core.jog(velocities),
        Command::Home(axes) => machine.homing_cycle_start(axes),
        Command::Hold => {
            machine.core.request_hold();
            Ok(())
        }
        Command::Start => {
            machine.core.request_start();
            Ok(())
        }
        Command::Flush => {
            machine.core.request_flush();
            Ok(())
        }
        Command::Resume => {
            machine.core.request_resume();
            Ok(())
        }
        Command::OptionalPause => {
            machine.core.request_optional_pause();
            Ok(())
        }
        Command::Step => {
            machine.core.request_step();
            Ok(())
        }
        Command::EStop => {
            machine.core.estop();
            Ok(())
        }
        Command::Switch(id, active) => {
            machine.on_switch(id, active);
            Ok(())
        }
        Command::MotorFault(motor, errors) => {
            machine.on_motor_fault(motor, errors);
            Ok(())
        }
        Command::MotorReset(motor) => {
            machine.motor_reset(motor);
            Ok(())
        }
    }
}
