//! Controller trait and the per-callback context it works through.
//!
//! RULE: every controller implements Controller.
//! The connection manager calls on_init() exactly once, on the first step
//! notification, then on_step() for every later qualifying notification.
//! Nothing is called after the session terminates.

use std::any::Any;

use serde::Serialize;

use crate::{
    command::{CommandSink, DomainCommandInterface},
    config::RunnerConfig,
    corridor_controller::DistributeOverCorridors,
    error::{ControlError, ControlResult},
    scheduler::{ScheduleTime, Scheduler},
    subscription::{StateSnapshot, Subscription, SubscriptionRegistry},
    types::SimTime,
};

/// Lifecycle of a controller within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Uninitialized,
    Running,
    Terminated,
}

/// The contract every controller must fulfill.
/// Both hooks default to doing nothing.
pub trait Controller {
    /// Stable name, used for lookup and log lines.
    fn name(&self) -> &'static str;

    /// Subscriptions registered (and activated) before the first step.
    /// The first one becomes the registry's default.
    fn subscriptions(&self) -> Vec<Subscription> {
        Vec::new()
    }

    /// Called once, on the engine's first step notification.
    fn on_init(
        &mut self,
        _time: SimTime,
        _state: &StateSnapshot,
        _ctx: &mut StepContext<'_>,
    ) -> ControlResult<()> {
        Ok(())
    }

    /// Called on every later step notification the controller asked for.
    fn on_step(
        &mut self,
        _time: SimTime,
        _state: &StateSnapshot,
        _ctx: &mut StepContext<'_>,
    ) -> ControlResult<()> {
        Ok(())
    }

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// What a controller may touch during one callback.
pub struct StepContext<'a> {
    time:       SimTime,
    registry:   &'a mut SubscriptionRegistry,
    sink:       &'a mut dyn CommandSink,
    scheduler:  &'a mut Scheduler,
    issued:     &'a mut u64,
    disconnect: bool,
}

impl<'a> StepContext<'a> {
    pub fn new(
        time: SimTime,
        registry: &'a mut SubscriptionRegistry,
        sink: &'a mut dyn CommandSink,
        scheduler: &'a mut Scheduler,
        issued: &'a mut u64,
    ) -> Self {
        Self {
            time,
            registry,
            sink,
            scheduler,
            issued,
            disconnect: false,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &*self.registry
    }

    /// For registering or activating subscriptions mid-session.
    /// Requests go out before the engine's next step.
    pub fn registry_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut *self.registry
    }

    pub fn commands(&mut self) -> DomainCommandInterface<'_> {
        DomainCommandInterface::new(&mut *self.sink, &*self.registry, &mut *self.issued)
    }

    /// Ask to be woken at `at`, relative to this callback's time.
    pub fn request_next(&mut self, at: ScheduleTime) -> Option<SimTime> {
        self.scheduler.request_next(self.time, at)
    }

    /// End the session after this callback returns.
    pub fn request_disconnect(&mut self) {
        self.disconnect = true;
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect
    }
}

/// Identity controller: subscribes to nothing, does nothing.
#[derive(Debug, Default)]
pub struct NoopController;

impl Controller for NoopController {
    fn name(&self) -> &'static str { "noop" }

    fn as_any(&self) -> &dyn Any { self }
}

/// Build a controller by the name given on the command line.
pub fn controller_from_name(name: &str, config: &RunnerConfig) -> ControlResult<Box<dyn Controller>> {
    match name {
        "noop" => Ok(Box::new(NoopController)),
        "distribute_over_corridors" | "corridors" => {
            Ok(Box::new(DistributeOverCorridors::new(config.corridor.clone())?))
        }
        other => Err(ControlError::Config(format!("unknown controller type '{other}'"))),
    }
}
