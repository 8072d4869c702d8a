//! Outbound commands and the typed façade controllers use to issue them.
//!
//! RULE: arguments are validated locally before anything touches the wire.
//! A malformed command costs no round-trip and never reaches the engine.

use serde::{Deserialize, Serialize};

use crate::{
    channel::{StateChannel, Transport},
    error::{ControlError, ControlResult},
    protocol::Request,
    subscription::SubscriptionRegistry,
    types::EntityId,
};

/// Entity category a command addresses.
/// Variants added per engine domain; never removed or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Person,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Replace the entity's ordered list of targets.
    SetTargetList { target_ids: Vec<EntityId> },
    /// Change the entity's desired walking speed (m/s).
    SetFreeFlowSpeed { speed: f64 },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetTargetList { .. }    => "set_target_list",
            Operation::SetFreeFlowSpeed { .. } => "set_free_flow_speed",
        }
    }
}

/// Fire-and-forget instruction. Takes effect on the engine's next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub domain:    Domain,
    pub entity_id: EntityId,
    pub operation: Operation,
}

/// Anything that can carry a validated command to the engine.
pub trait CommandSink {
    fn issue(&mut self, command: Command) -> ControlResult<()>;
}

impl<T: Transport> CommandSink for StateChannel<T> {
    fn issue(&mut self, command: Command) -> ControlResult<()> {
        self.send_expect_ack(Request::Command(command))
    }
}

/// Typed façade over outbound commands, scoped to one controller callback.
pub struct DomainCommandInterface<'a> {
    sink:     &'a mut dyn CommandSink,
    registry: &'a SubscriptionRegistry,
    issued:   &'a mut u64,
}

impl<'a> DomainCommandInterface<'a> {
    pub fn new(
        sink: &'a mut dyn CommandSink,
        registry: &'a SubscriptionRegistry,
        issued: &'a mut u64,
    ) -> Self {
        Self { sink, registry, issued }
    }

    // ── Person domain ─────────────────────────────

    pub fn set_target_list<I, S>(&mut self, entity_id: &str, target_ids: I) -> ControlResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        let entity_id = validate_entity_id(entity_id)?;
        let target_ids: Vec<EntityId> = target_ids.into_iter().map(Into::into).collect();
        if target_ids.is_empty() {
            return Err(ControlError::invalid(format!(
                "set_target_list for '{entity_id}': target list is empty"
            )));
        }
        if let Some(bad) = target_ids.iter().find(|t| t.trim().is_empty()) {
            return Err(ControlError::invalid(format!(
                "set_target_list for '{entity_id}': blank target id {bad:?}"
            )));
        }
        self.send(Command {
            domain: Domain::Person,
            entity_id,
            operation: Operation::SetTargetList { target_ids },
        })
    }

    pub fn set_free_flow_speed(&mut self, entity_id: &str, speed: f64) -> ControlResult<()> {
        let entity_id = validate_entity_id(entity_id)?;
        if !speed.is_finite() || speed < 0.0 {
            return Err(ControlError::invalid(format!(
                "set_free_flow_speed for '{entity_id}': speed {speed} is not a finite non-negative value"
            )));
        }
        self.send(Command {
            domain: Domain::Person,
            entity_id,
            operation: Operation::SetFreeFlowSpeed { speed },
        })
    }

    fn send(&mut self, command: Command) -> ControlResult<()> {
        // Best effort only: the engine may spawn entities between steps.
        if !self.registry.known_entity(&command.entity_id) {
            log::warn!(
                "{} for entity '{}' which no snapshot has reported yet",
                command.operation.name(),
                command.entity_id
            );
        }
        let op = command.operation.name();
        let entity = command.entity_id.clone();
        self.sink.issue(command)?;
        *self.issued += 1;
        log::debug!("{op} -> {entity}");
        Ok(())
    }
}

fn validate_entity_id(entity_id: &str) -> ControlResult<EntityId> {
    let trimmed = entity_id.trim();
    if trimmed.is_empty() {
        return Err(ControlError::invalid("entity id must not be empty"));
    }
    Ok(trimmed.to_string())
}
