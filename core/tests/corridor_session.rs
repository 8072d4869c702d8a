//! Corridor distribution end to end against a scripted engine.
//!
//! Geofence (15, 5) r=7.5, targets 11..51 round-robin, one reassignment
//! every 30 s of simulation time.

mod common;

use common::{schedule_acks, step_with_positions, ScriptedEngine};
use crowdctl_core::{
    command::Operation,
    config::{CorridorConfig, RunnerConfig, SessionConfig},
    controller::controller_from_name,
    corridor_controller::DistributeOverCorridors,
    manager::{ConnectionManager, EndReason},
    protocol::Request,
    scenario::Scenario,
    subscription::{EntityClass, Variable},
};

fn commands(log: &common::RequestLog) -> Vec<(String, Operation)> {
    log.borrow()
        .iter()
        .filter_map(|r| match r {
            Request::Command(cmd) => Some((cmd.entity_id.clone(), cmd.operation.clone())),
            _ => None,
        })
        .collect()
}

fn target(id: &str) -> Operation {
    Operation::SetTargetList { target_ids: vec![id.to_string()] }
}

#[test]
fn pedestrians_inside_the_fence_are_spread_over_corridors() {
    let script = vec![
        step_with_positions(0.0, &[("1", 15.0, 5.0), ("2", 40.0, 5.0)]),
        step_with_positions(0.4, &[("1", 15.0, 5.0), ("2", 40.0, 5.0), ("3", 22.5, 5.0)]),
        step_with_positions(10.0, &[("1", 15.0, 5.0)]),
        step_with_positions(30.0, &[("2", 16.0, 5.0)]),
        step_with_positions(60.0, &[]),
    ];
    let (channel, log, _) = ScriptedEngine::new(script).into_channel();
    let mut controller = DistributeOverCorridors::new(CorridorConfig::default()).unwrap();

    let report = ConnectionManager::new(SessionConfig::default()).run(
        channel,
        &mut controller,
        &Scenario::new("route_choice_real_world.scenario", "{}"),
    );

    assert!(report.is_clean(), "{:?}", report.error);
    assert!(matches!(report.end_reason, EndReason::EngineClosed { .. }));
    assert_eq!(
        commands(&log),
        [
            ("1".to_string(), target("11")),
            ("3".to_string(), target("11")),
            ("2".to_string(), target("21")),
        ]
    );
    assert_eq!(
        schedule_acks(&log),
        [None, None, Some(30.0), Some(30.0), Some(60.0), Some(90.0)]
    );
    assert_eq!(report.steps_seen, 5);
    assert_eq!(report.invocations, 4);
    assert_eq!(report.commands_issued, 3);
    assert_eq!(controller.state.counter, 3);
    assert_eq!(controller.state.last_target.as_deref(), Some("31"));
    assert!(controller.state.last_rerouted.is_empty());
}

#[test]
fn position_subscription_is_set_up_before_the_first_step() {
    let (channel, log, _) = ScriptedEngine::new(vec![]).into_channel();
    let mut controller = DistributeOverCorridors::new(CorridorConfig::default()).unwrap();

    ConnectionManager::new(SessionConfig::default())
        .run(channel, &mut controller, &Scenario::new("a", "{}"));

    let log = log.borrow();
    let first_ack = log
        .iter()
        .position(|r| matches!(r, Request::ScheduleAck { .. }))
        .unwrap();
    let subscribe = log
        .iter()
        .position(|r| {
            matches!(r, Request::Subscribe { name, entity_class, variables }
                if name == "default"
                    && *entity_class == EntityClass::Person
                    && variables == &[Variable::Position])
        })
        .unwrap();
    assert!(subscribe < first_ack);
}

#[test]
fn undecodable_positions_are_skipped_not_rerouted() {
    use crowdctl_core::protocol::{RawEntity, Response, StepPayload};

    let bad = Response::Step(StepPayload {
        time:    0.4,
        results: [(
            "default".to_string(),
            vec![
                RawEntity {
                    id:     "1".into(),
                    values: [("position".to_string(), serde_json::json!("at the door"))].into(),
                },
                RawEntity {
                    id:     "2".into(),
                    values: [("position".to_string(), serde_json::json!({"x": 15.0, "y": 6.0}))].into(),
                },
            ],
        )]
        .into(),
    });
    let script = vec![step_with_positions(0.0, &[]), bad];
    let (channel, log, _) = ScriptedEngine::new(script).into_channel();
    let mut controller = DistributeOverCorridors::new(CorridorConfig::default()).unwrap();

    let report = ConnectionManager::new(SessionConfig::default())
        .run(channel, &mut controller, &Scenario::new("a", "{}"));

    assert!(report.is_clean());
    assert_eq!(commands(&log), [("2".to_string(), target("11"))]);
}

#[test]
fn controller_built_by_name_runs_the_same_session() {
    let config = RunnerConfig::default_test();
    let mut controller = controller_from_name("distribute_over_corridors", &config).unwrap();
    let script = vec![
        step_with_positions(0.0, &[]),
        step_with_positions(0.4, &[("7", 10.0, 5.0)]),
    ];
    let (channel, log, _) = ScriptedEngine::new(script).into_channel();

    let report = ConnectionManager::new(config.session.clone()).run(
        channel,
        controller.as_mut(),
        &Scenario::new("a", "{}"),
    );

    assert!(report.is_clean());
    assert_eq!(report.controller, "distribute_over_corridors");
    assert_eq!(commands(&log), [("7".to_string(), target("11"))]);
    let corridors = controller
        .as_any()
        .downcast_ref::<DistributeOverCorridors>()
        .unwrap();
    assert_eq!(corridors.state.invocations, 1);
}
