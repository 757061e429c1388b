//! Per-worker state machine (§4.3). One `RunnerState` per `JobRunner` actor.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Dispatching,
    Running,
    Cancelling,
    Terminating,
    Dead,
}

impl RunnerState {
    /// Only an `Idle` runner may accept a new job; concurrent `run()` calls
    /// against the same reservation are API misuse (`ErrBusy`, §4.4).
    pub fn can_accept_job(self) -> bool {
        matches!(self, RunnerState::Idle)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunnerState::Dead)
    }

    pub fn has_job_in_flight(self) -> bool {
        matches!(self, RunnerState::Dispatching | RunnerState::Running | RunnerState::Cancelling)
    }
}
