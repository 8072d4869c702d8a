//! A scripted in-process engine for session tests.
//!
//! Answers setup and command requests the way a well-behaved engine would,
//! and hands out one scripted reply per `schedule_ack`. When the script
//! runs out it either closes cleanly or drops the connection.

#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crowdctl_core::{
    channel::{StateChannel, Transport},
    error::{ControlError, ControlResult},
    protocol::{RawEntity, Request, Response, StepPayload, PROTOCOL_VERSION},
    types::SimTime,
};

pub type RequestLog = Rc<RefCell<Vec<Request>>>;

pub struct ScriptedEngine {
    pub welcome_version: u32,
    /// One reply per `schedule_ack`, in order.
    pub script:          VecDeque<Response>,
    /// Command targets the engine answers with `error`.
    pub reject_entities: Vec<String>,
    /// When the script is exhausted: drop the connection instead of `closed`.
    pub drop_at_end:     bool,
    pub log:             RequestLog,
    pub closes:          Rc<RefCell<usize>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Response>) -> Self {
        init_logging();
        Self {
            welcome_version: PROTOCOL_VERSION,
            script:          script.into(),
            reject_entities: Vec::new(),
            drop_at_end:     false,
            log:             Rc::new(RefCell::new(Vec::new())),
            closes:          Rc::new(RefCell::new(0)),
        }
    }

    /// Channel plus handles to inspect the traffic afterwards.
    pub fn into_channel(self) -> (StateChannel<ScriptedEngine>, RequestLog, Rc<RefCell<usize>>) {
        let log = Rc::clone(&self.log);
        let closes = Rc::clone(&self.closes);
        (StateChannel::new(self), log, closes)
    }
}

impl Transport for ScriptedEngine {
    fn exchange(&mut self, request: &Request) -> ControlResult<Response> {
        self.log.borrow_mut().push(request.clone());
        let reply = match request {
            Request::Hello { .. } => Response::Welcome {
                protocol_version: self.welcome_version,
                engine:           "scripted".into(),
            },
            Request::Scenario { .. } | Request::Subscribe { .. } | Request::Disconnect => Response::Ack,
            Request::Command(cmd) if self.reject_entities.contains(&cmd.entity_id) => Response::Error {
                message: format!("no pedestrian with id {}", cmd.entity_id),
            },
            Request::Command(_) => Response::Ack,
            Request::ScheduleAck { .. } => match self.script.pop_front() {
                Some(reply) => reply,
                None if self.drop_at_end => {
                    return Err(ControlError::Connection {
                        addr:   "scripted".into(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "engine went away",
                        ),
                    });
                }
                None => Response::Closed { reason: Some("simulation finished".into()) },
            },
        };
        Ok(reply)
    }

    fn close(&mut self) -> ControlResult<()> {
        *self.closes.borrow_mut() += 1;
        Ok(())
    }

    fn peer(&self) -> String {
        "scripted".into()
    }
}

/// RUST_LOG=debug shows the session traffic in test output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A step with no subscription results.
pub fn step(time: SimTime) -> Response {
    Response::Step(StepPayload { time, ..StepPayload::default() })
}

/// A step reporting pedestrian positions under the `default` subscription.
pub fn step_with_positions(time: SimTime, peds: &[(&str, f64, f64)]) -> Response {
    positions_for("default", time, peds)
}

/// A step reporting pedestrian positions under subscription `name`.
pub fn positions_for(name: &str, time: SimTime, peds: &[(&str, f64, f64)]) -> Response {
    let entities = peds
        .iter()
        .map(|(id, x, y)| RawEntity {
            id:     id.to_string(),
            values: [("position".to_string(), serde_json::json!([x, y]))].into(),
        })
        .collect();
    Response::Step(StepPayload {
        time,
        results: [(name.to_string(), entities)].into(),
    })
}

/// Every `next_time` the controller sent, in order.
pub fn schedule_acks(log: &RequestLog) -> Vec<Option<SimTime>> {
    log.borrow()
        .iter()
        .filter_map(|r| match r {
            Request::ScheduleAck { next_time } => Some(*next_time),
            _ => None,
        })
        .collect()
}

pub fn kinds(log: &RequestLog) -> Vec<&'static str> {
    log.borrow().iter().map(Request::kind).collect()
}
