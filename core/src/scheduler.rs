//! Scheduler: when the controller next wants to be woken.
//!
//! The engine owns simulation time. The scheduler can only ask to skip
//! steps; it can never make the engine call us earlier than it would.

use crate::types::SimTime;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleTime {
    /// Seconds after the current step's time.
    Delta(SimTime),
    /// An absolute simulation time.
    Absolute(SimTime),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scheduler {
    pending:  Option<SimTime>,
    requests: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the desired next activation, replacing any earlier request.
    /// A time at or before `current_time` means "every step" and is stored
    /// as no request at all. Returns what was stored.
    pub fn request_next(&mut self, current_time: SimTime, at: ScheduleTime) -> Option<SimTime> {
        let wanted = match at {
            ScheduleTime::Delta(delta)   => current_time + delta,
            ScheduleTime::Absolute(time) => time,
        };
        self.requests += 1;
        let next = if wanted.is_finite() && wanted > current_time {
            Some(wanted)
        } else {
            None
        };
        if let Some(prev) = self.pending {
            log::trace!("t={current_time} replacing schedule request {prev} with {next:?}");
        }
        self.pending = next;
        self.pending
    }

    pub fn pending(&self) -> Option<SimTime> {
        self.pending
    }

    /// Consume the pending request. Cleared until the next `request_next`.
    pub fn take(&mut self) -> Option<SimTime> {
        self.pending.take()
    }

    /// How many requests were made over the scheduler's lifetime.
    pub fn requests(&self) -> u64 {
        self.requests
    }
}
