//! Worker thread running the planner's control cycle in the background.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info};

use super::{GbpError, GbpHandle, GlobalBodyPlanner};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Owns a [`GlobalBodyPlanner`] running on its own thread.
pub struct GbpWorker {
    handle: GbpHandle,
    sender: Sender<WorkerSignal>,
    jh: JoinHandle<Result<(), GbpError>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub enum WorkerSignal {
    /// The worker should stop after the current cycle.
    Stop,

    /// Enable or disable replanning.
    SetReplanningAllowed(bool),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GbpWorker {
    /// Move the planner onto a new thread which steps it once every `period`.
    pub fn spawn(planner: GlobalBodyPlanner, period: Duration) -> Result<Self, GbpError> {
        let handle = planner.handle();
        let (sender, rx) = channel();

        let jh = thread::Builder::new()
            .name("gbp::worker".into())
            .spawn(move || worker_thread(planner, period, rx))
            .map_err(GbpError::WorkerSpawnError)?;

        Ok(Self { handle, sender, jh })
    }

    /// Get a handle onto the planner's inputs and outputs.
    pub fn handle(&self) -> GbpHandle {
        self.handle.clone()
    }

    pub fn set_replanning_allowed(&self, allowed: bool) -> Result<(), GbpError> {
        self.sender
            .send(WorkerSignal::SetReplanningAllowed(allowed))?;
        Ok(())
    }

    /// Stop the worker and wait for it to exit, returning any error it stopped with.
    pub fn stop(self) -> Result<(), GbpError> {
        // If the worker already exited the channel is closed, the join below reports why
        self.sender.send(WorkerSignal::Stop).ok();

        match self.jh.join() {
            Ok(r) => r,
            Err(_) => Err(GbpError::WorkerPanicked),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn worker_thread(
    mut planner: GlobalBodyPlanner,
    period: Duration,
    receiver: Receiver<WorkerSignal>,
) -> Result<(), GbpError> {
    info!("GBP worker started with period {:?}", period);

    loop {
        let cycle_start = Instant::now();

        if let Err(e) = planner.step() {
            error!("GBP worker stopping: {}", e);
            return Err(e);
        }

        // Wait out the rest of the period while listening for signals
        loop {
            let remaining = period
                .checked_sub(cycle_start.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match receiver.recv_timeout(remaining) {
                Ok(WorkerSignal::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    info!("GBP worker stopped");
                    return Ok(());
                }
                Ok(WorkerSignal::SetReplanningAllowed(allowed)) => {
                    debug!("Worker received replanning allowed = {}", allowed);
                    planner.set_replanning_allowed(allowed)
                }
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
