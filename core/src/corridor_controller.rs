//! Corridor distribution: spread pedestrians over parallel corridors.
//!
//! Every `interval` seconds, every pedestrian inside a circular geofence
//! gets the next target from a fixed list. The list is walked round-robin
//! and wraps at its end.

use crate::{
    config::CorridorConfig,
    controller::{Controller, StepContext},
    error::ControlResult,
    scheduler::ScheduleTime,
    subscription::{EntityClass, StateSnapshot, Subscription, Variable},
    types::{EntityId, Point, SimTime},
};

/// Alias the position variable is stored under.
pub const POSITION_ALIAS: &str = "pos";

/// A circle in scenario coordinates. The boundary is inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub center: Point,
    pub radius: f64,
}

impl Geofence {
    pub fn new(center: Point, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, p: Point) -> bool {
        // Squared distances keep the boundary exact.
        let dx = self.center.x - p.x;
        let dy = self.center.y - p.y;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorridorState {
    /// Index into the target list used by the next invocation.
    pub counter:       usize,
    /// Absolute time of the next requested activation.
    pub next_call:     SimTime,
    pub invocations:   u64,
    pub last_target:   Option<EntityId>,
    pub last_rerouted: Vec<EntityId>,
}

pub struct DistributeOverCorridors {
    pub state: CorridorState,
    config:    CorridorConfig,
    fence:     Geofence,
}

impl DistributeOverCorridors {
    pub fn new(config: CorridorConfig) -> ControlResult<Self> {
        config.validate()?;
        Ok(Self {
            fence: Geofence::new(config.center, config.radius),
            state: CorridorState::default(),
            config,
        })
    }

    /// Target for this invocation; advances the round-robin index.
    pub fn next_target(&mut self) -> EntityId {
        if self.state.counter >= self.config.target_ids.len() {
            self.state.counter = 0;
        }
        let target = self.config.target_ids[self.state.counter].clone();
        self.state.counter += 1;
        target
    }

    /// Ids of every entity in `state` currently inside the geofence.
    pub fn inside(&self, state: &StateSnapshot) -> Vec<EntityId> {
        state
            .records(&self.config.subscription)
            .iter()
            .filter(|r| r.point(POSITION_ALIAS).is_some_and(|p| self.fence.contains(p)))
            .map(|r| r.id.clone())
            .collect()
    }
}

impl Controller for DistributeOverCorridors {
    fn name(&self) -> &'static str { "distribute_over_corridors" }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription::new(self.config.subscription.as_str(), EntityClass::Person)
            .with_var(POSITION_ALIAS, Variable::Position)]
    }

    fn on_init(
        &mut self,
        time: SimTime,
        state: &StateSnapshot,
        ctx: &mut StepContext<'_>,
    ) -> ControlResult<()> {
        log::info!(
            "t={time} corridors: init with {} pedestrians visible, fence {} r={}",
            state.records(&self.config.subscription).len(),
            self.fence.center,
            self.fence.radius
        );
        self.state.next_call = 0.0;
        ctx.request_next(ScheduleTime::Absolute(self.state.next_call));
        Ok(())
    }

    fn on_step(
        &mut self,
        time: SimTime,
        state: &StateSnapshot,
        ctx: &mut StepContext<'_>,
    ) -> ControlResult<()> {
        let target = self.next_target();
        let ids = self.inside(state);
        log::info!("t={time} corridors: target {target} for {} pedestrians {ids:?}", ids.len());

        let mut rerouted = Vec::with_capacity(ids.len());
        for id in ids {
            match ctx.commands().set_target_list(&id, [target.as_str()]) {
                Ok(()) => rerouted.push(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("t={time} corridors: reroute of {id} dropped: {e}"),
            }
        }

        self.state.next_call += self.config.interval;
        ctx.request_next(ScheduleTime::Absolute(self.state.next_call));
        self.state.invocations += 1;
        self.state.last_target = Some(target);
        self.state.last_rerouted = rerouted;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{Command, CommandSink, Operation},
        error::ControlError,
        scheduler::Scheduler,
        subscription::{EntityRecord, SubscriptionRegistry, VarValue},
    };

    #[derive(Default)]
    struct Sink {
        sent:   Vec<Command>,
        reject: Option<EntityId>,
    }

    impl CommandSink for Sink {
        fn issue(&mut self, command: Command) -> ControlResult<()> {
            if self.reject.as_deref() == Some(command.entity_id.as_str()) {
                return Err(ControlError::Rejected { message: "gone".into() });
            }
            self.sent.push(command);
            Ok(())
        }
    }

    fn ped(id: &str, x: f64, y: f64) -> EntityRecord {
        EntityRecord {
            id:     id.into(),
            values: [(POSITION_ALIAS.to_string(), VarValue::Point(Point::new(x, y)))].into(),
        }
    }

    fn snapshot(time: SimTime, peds: Vec<EntityRecord>) -> StateSnapshot {
        StateSnapshot {
            time,
            subscriptions: [("default".to_string(), peds)].into(),
            dropped: 0,
        }
    }

    fn controller() -> DistributeOverCorridors {
        DistributeOverCorridors::new(CorridorConfig::default()).unwrap()
    }

    #[test]
    fn round_robin_wraps_after_last_target() {
        let mut c = controller();
        let picked: Vec<_> = (0..6).map(|_| c.next_target()).collect();
        assert_eq!(picked, ["11", "21", "31", "41", "51", "11"]);
    }

    #[test]
    fn geofence_boundary_is_inclusive() {
        let fence = Geofence::new(Point::new(15.0, 5.0), 7.5);
        assert!(fence.contains(Point::new(22.5, 5.0)));
        assert!(fence.contains(Point::new(15.0, -2.5)));
        assert!(fence.contains(Point::new(15.0, 5.0)));
        assert!(!fence.contains(Point::new(22.5 + 1e-9, 5.0)));
        assert!(!fence.contains(Point::new(15.0, 12.5 + 1e-6)));
    }

    #[test]
    fn on_step_reroutes_only_pedestrians_inside() {
        let mut c = controller();
        let mut registry = SubscriptionRegistry::new();
        let mut sink = Sink::default();
        let mut scheduler = Scheduler::new();
        let mut issued = 0;
        let state = snapshot(
            0.4,
            vec![ped("1", 15.0, 5.0), ped("2", 40.0, 5.0), ped("3", 22.5, 5.0)],
        );

        let mut ctx = StepContext::new(0.4, &mut registry, &mut sink, &mut scheduler, &mut issued);
        c.on_step(0.4, &state, &mut ctx).unwrap();
        drop(ctx);

        let targets: Vec<_> = sink.sent.iter().map(|cmd| cmd.entity_id.as_str()).collect();
        assert_eq!(targets, ["1", "3"]);
        assert!(sink.sent.iter().all(|cmd| cmd.operation
            == Operation::SetTargetList { target_ids: vec!["11".into()] }));
        assert_eq!(scheduler.pending(), Some(30.0));
        assert_eq!(c.state.counter, 1);
        assert_eq!(c.state.last_rerouted, ["1", "3"]);
    }

    #[test]
    fn schedule_advances_by_interval_each_invocation() {
        let mut c = controller();
        let mut registry = SubscriptionRegistry::new();
        let mut sink = Sink::default();
        let mut scheduler = Scheduler::new();
        let mut issued = 0;
        let empty = snapshot(0.0, vec![]);

        let mut ctx = StepContext::new(0.0, &mut registry, &mut sink, &mut scheduler, &mut issued);
        c.on_init(0.0, &empty, &mut ctx).unwrap();
        drop(ctx);
        // Absolute(0.0) at t=0 means "every step".
        assert_eq!(scheduler.take(), None);

        for (time, expected) in [(0.4, 30.0), (30.0, 60.0), (60.0, 90.0)] {
            let mut ctx = StepContext::new(time, &mut registry, &mut sink, &mut scheduler, &mut issued);
            c.on_step(time, &empty, &mut ctx).unwrap();
            drop(ctx);
            assert_eq!(scheduler.take(), Some(expected));
        }
        assert_eq!(c.state.invocations, 3);
        assert_eq!(c.state.last_target.as_deref(), Some("31"));
    }

    #[test]
    fn rejected_reroute_does_not_stop_the_others() {
        let mut c = controller();
        let mut registry = SubscriptionRegistry::new();
        let mut sink = Sink { reject: Some("1".into()), ..Sink::default() };
        let mut scheduler = Scheduler::new();
        let mut issued = 0;
        let state = snapshot(1.0, vec![ped("1", 15.0, 5.0), ped("2", 16.0, 5.0)]);

        let mut ctx = StepContext::new(1.0, &mut registry, &mut sink, &mut scheduler, &mut issued);
        c.on_step(1.0, &state, &mut ctx).unwrap();
        drop(ctx);

        assert_eq!(c.state.last_rerouted, ["2"]);
        assert_eq!(issued, 1);
    }

    #[test]
    fn declares_position_subscription() {
        let subs = controller().subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].name, "default");
        assert_eq!(subs[0].entity_class, EntityClass::Person);
        assert_eq!(subs[0].variables[0].variable, Variable::Position);
    }
}
