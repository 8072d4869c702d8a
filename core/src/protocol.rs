//! Wire protocol between the controller and the simulation engine.
//!
//! Framing: one JSON object per line, newline terminated.
//! Every message carries a `type` tag.
//!
//! RULE: the controller sends exactly one `Request` and then reads exactly
//! one `Response` before sending anything else. Responses are never
//! pipelined and never arrive unsolicited.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    command::Command,
    error::ControlResult,
    subscription::{EntityClass, Variable},
    types::{EntityId, SimTime},
};

/// Bumped whenever a message shape changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Controller → engine.
/// Variants added as the protocol grows; never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // ── Session setup ─────────────────────────────
    Hello {
        protocol_version: u32,
        controller:       String,
        gui_mode:         bool,
    },
    /// `content` is a JSON string when the file is UTF-8 text,
    /// otherwise an array of byte values.
    Scenario {
        file_name: String,
        #[serde(with = "scenario_content")]
        content:   Vec<u8>,
    },
    Subscribe {
        name:         String,
        entity_class: EntityClass,
        variables:    Vec<Variable>,
    },

    // ── Per step ──────────────────────────────────
    Command(Command),
    /// Finishes the controller's turn. `next_time: None` means
    /// "invoke me again on the next step".
    ScheduleAck { next_time: Option<SimTime> },

    // ── Teardown ──────────────────────────────────
    Disconnect,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Hello { .. }       => "hello",
            Request::Scenario { .. }    => "scenario",
            Request::Subscribe { .. }   => "subscribe",
            Request::Command(_)         => "command",
            Request::ScheduleAck { .. } => "schedule_ack",
            Request::Disconnect         => "disconnect",
        }
    }
}

/// Engine → controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Welcome {
        protocol_version: u32,
        #[serde(default)]
        engine:           String,
    },
    Ack,
    /// Step notification: a new simulation time has been reached.
    Step(StepPayload),
    Error { message: String },
    /// Engine-initiated termination (simulation finished or aborted).
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Welcome { .. } => "welcome",
            Response::Ack            => "ack",
            Response::Step(_)        => "step",
            Response::Error { .. }   => "error",
            Response::Closed { .. }  => "closed",
        }
    }
}

/// Raw per-step data, keyed by subscription name. Undecoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    pub time:    SimTime,
    #[serde(default)]
    pub results: BTreeMap<String, Vec<RawEntity>>,
}

/// One entity's raw variable values, keyed by variable wire name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub id:     EntityId,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

mod scenario_content {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    #[serde(untagged)]
    enum Repr<'a> {
        Text(&'a str),
        Bytes(&'a [u8]),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Owned {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(content) {
            Ok(text) => Repr::Text(text).serialize(serializer),
            Err(_) => Repr::Bytes(content).serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Owned::deserialize(deserializer)? {
            Owned::Text(text) => text.into_bytes(),
            Owned::Bytes(bytes) => bytes,
        })
    }
}

/// Encode one message as a single newline-terminated frame.
pub fn encode_frame<T: Serialize>(message: &T) -> ControlResult<Vec<u8>> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one frame. Trailing whitespace (the newline) is ignored.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> ControlResult<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}
