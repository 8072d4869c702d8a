//! Subscription registry: what we asked the engine for, and what it said.
//!
//! RULE: the registry never invents entities. A record in a snapshot exists
//! only because the engine reported that id this step with every declared
//! variable decodable. Anything less is dropped with a warning.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    channel::{StateChannel, Transport},
    error::{ControlError, ControlResult},
    protocol::{RawEntity, Request, StepPayload},
    types::{EntityId, Point, SimTime},
};

// ── Entity classes and variables ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    /// Pedestrian agents.
    Person,
    /// Static scenario areas (targets, sources, obstacles).
    Polygon,
}

/// Variables the engine can report per entity.
/// Variants added as the engine grows; never removed or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Position,
    Velocity,
    Speed,
    TargetList,
    GroupId,
}

impl Variable {
    /// Key of this variable inside a raw entity's `values` map.
    pub fn wire_name(self) -> &'static str {
        match self {
            Variable::Position   => "position",
            Variable::Velocity   => "velocity",
            Variable::Speed      => "speed",
            Variable::TargetList => "target_list",
            Variable::GroupId    => "group_id",
        }
    }

    /// The decode function this variable uses unless a subscription
    /// overrides it.
    pub fn default_decoder(self) -> Decoder {
        match self {
            Variable::Position | Variable::Velocity => decode_point,
            Variable::Speed                         => decode_number,
            Variable::TargetList                    => decode_ids,
            Variable::GroupId                       => decode_integer,
        }
    }
}

/// Turns one raw JSON value into a typed value, or explains why not.
pub type Decoder = fn(&serde_json::Value) -> Result<VarValue, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Point(Point),
    Number(f64),
    Integer(i64),
    Ids(Vec<EntityId>),
}

impl VarValue {
    pub fn as_point(&self) -> Option<Point> {
        match self {
            VarValue::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VarValue::Number(n)  => Some(*n),
            VarValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[EntityId]> {
        match self {
            VarValue::Ids(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Accepts `[x, y]` or `{"x": .., "y": ..}`.
pub fn decode_point(raw: &serde_json::Value) -> Result<VarValue, String> {
    let (x, y) = match raw {
        serde_json::Value::Array(items) if items.len() == 2 => (items[0].as_f64(), items[1].as_f64()),
        serde_json::Value::Object(map) => (
            map.get("x").and_then(|v| v.as_f64()),
            map.get("y").and_then(|v| v.as_f64()),
        ),
        _ => (None, None),
    };
    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(VarValue::Point(Point::new(x, y))),
        _ => Err(format!("expected a finite 2D point, got {raw}")),
    }
}

pub fn decode_number(raw: &serde_json::Value) -> Result<VarValue, String> {
    match raw.as_f64() {
        Some(n) if n.is_finite() => Ok(VarValue::Number(n)),
        _ => Err(format!("expected a finite number, got {raw}")),
    }
}

pub fn decode_integer(raw: &serde_json::Value) -> Result<VarValue, String> {
    raw.as_i64()
        .map(VarValue::Integer)
        .ok_or_else(|| format!("expected an integer, got {raw}"))
}

/// Id lists may arrive as strings or as bare integers.
pub fn decode_ids(raw: &serde_json::Value) -> Result<VarValue, String> {
    let items = raw
        .as_array()
        .ok_or_else(|| format!("expected a list of ids, got {raw}"))?;
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            other => Err(format!("expected an id, got {other}")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(VarValue::Ids)
}

// ── Subscriptions ────────────────────────────────────────────────────────────

/// One variable to fetch, the alias it is stored under, and how to decode it.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub alias:    String,
    pub variable: Variable,
    pub decoder:  Decoder,
}

impl VariableSpec {
    pub fn new(alias: impl Into<String>, variable: Variable) -> Self {
        Self {
            alias: alias.into(),
            variable,
            decoder: variable.default_decoder(),
        }
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub name:         String,
    pub entity_class: EntityClass,
    pub variables:    Vec<VariableSpec>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, entity_class: EntityClass) -> Self {
        Self {
            name: name.into(),
            entity_class,
            variables: Vec::new(),
        }
    }

    /// Builder: fetch `variable` and store it under `alias`.
    pub fn with_var(mut self, alias: impl Into<String>, variable: Variable) -> Self {
        self.variables.push(VariableSpec::new(alias, variable));
        self
    }

    fn decode(&self, raw: &RawEntity) -> Result<EntityRecord, String> {
        if raw.id.trim().is_empty() {
            return Err("empty entity id".to_string());
        }
        let mut values = BTreeMap::new();
        for spec in &self.variables {
            let wire = spec.variable.wire_name();
            let value = raw
                .values
                .get(wire)
                .ok_or_else(|| format!("missing variable '{wire}'"))?;
            let decoded = (spec.decoder)(value).map_err(|e| format!("variable '{wire}': {e}"))?;
            values.insert(spec.alias.clone(), decoded);
        }
        Ok(EntityRecord {
            id: raw.id.clone(),
            values,
        })
    }
}

/// One entity's decoded values for one step, keyed by alias.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id:     EntityId,
    pub values: BTreeMap<String, VarValue>,
}

impl EntityRecord {
    pub fn get(&self, alias: &str) -> Option<&VarValue> {
        self.values.get(alias)
    }

    pub fn point(&self, alias: &str) -> Option<Point> {
        self.get(alias).and_then(VarValue::as_point)
    }
}

/// Everything the controller knows about one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub time:          SimTime,
    pub subscriptions: BTreeMap<String, Vec<EntityRecord>>,
    /// Entities reported by the engine but left out of this snapshot.
    pub dropped:       usize,
}

impl StateSnapshot {
    pub fn records(&self, name: &str) -> &[EntityRecord] {
        self.subscriptions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    /// Registered, engine not asked yet.
    Inactive,
    /// Will be sent on the next flush.
    Requested,
    /// Engine acknowledged; data arrives every step.
    Active,
}

struct Entry {
    subscription: Subscription,
    activation:   Activation,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Entry>,
    default: Option<String>,
    latest:  BTreeMap<String, Vec<EntityRecord>>,
    seen:    HashSet<EntityId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store subscription metadata. With `init_now` the subscribe request
    /// goes out on the next `flush`, so data arrives from the next step.
    /// Without it the subscription waits for `activate`.
    pub fn register(
        &mut self,
        name: &str,
        entity_class: EntityClass,
        variables: Vec<VariableSpec>,
        init_now: bool,
    ) -> ControlResult<()> {
        let subscription = Subscription {
            name: name.to_string(),
            entity_class,
            variables,
        };
        self.register_subscription(subscription, init_now)
    }

    pub fn register_subscription(
        &mut self,
        subscription: Subscription,
        init_now: bool,
    ) -> ControlResult<()> {
        if subscription.name.trim().is_empty() {
            return Err(ControlError::invalid("subscription name must not be empty"));
        }
        if self.find(&subscription.name).is_some() {
            return Err(ControlError::invalid(format!(
                "subscription '{}' is already registered",
                subscription.name
            )));
        }
        if subscription.variables.is_empty() {
            return Err(ControlError::invalid(format!(
                "subscription '{}' declares no variables",
                subscription.name
            )));
        }
        let mut aliases = HashSet::new();
        for spec in &subscription.variables {
            if !aliases.insert(spec.alias.as_str()) {
                return Err(ControlError::invalid(format!(
                    "subscription '{}' uses alias '{}' twice",
                    subscription.name, spec.alias
                )));
            }
        }

        log::debug!(
            "registered subscription '{}' ({:?}, {} vars, init_now={init_now})",
            subscription.name,
            subscription.entity_class,
            subscription.variables.len()
        );
        self.entries.push(Entry {
            subscription,
            activation: if init_now { Activation::Requested } else { Activation::Inactive },
        });
        Ok(())
    }

    /// Ask for a previously registered, inactive subscription to start.
    pub fn activate(&mut self, name: &str) -> ControlResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.subscription.name == name)
            .ok_or_else(|| ControlError::invalid(format!("no subscription named '{name}'")))?;
        if entry.activation == Activation::Inactive {
            entry.activation = Activation::Requested;
        }
        Ok(())
    }

    /// Send every requested subscription to the engine.
    /// Returns how many were activated.
    pub fn flush<T: Transport>(&mut self, channel: &mut StateChannel<T>) -> ControlResult<usize> {
        let mut sent = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.activation == Activation::Requested)
        {
            let sub = &entry.subscription;
            let sent_ok = channel.send_expect_ack(Request::Subscribe {
                name:         sub.name.clone(),
                entity_class: sub.entity_class,
                variables:    sub.variables.iter().map(|v| v.variable).collect(),
            });
            if let Err(e) = sent_ok {
                // Not retried on the next flush; `activate` asks again.
                entry.activation = Activation::Inactive;
                return Err(e);
            }
            entry.activation = Activation::Active;
            log::info!("subscription '{}' active", sub.name);
            sent += 1;
        }
        Ok(sent)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|e| e.activation == Activation::Active)
    }

    pub fn set_default(&mut self, name: &str) -> ControlResult<()> {
        if self.find(name).is_none() {
            return Err(ControlError::invalid(format!("no subscription named '{name}'")));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Decode one step's raw payload into a snapshot and cache it.
    pub fn resolve(&mut self, payload: &StepPayload) -> StateSnapshot {
        let mut snapshot = StateSnapshot {
            time: payload.time,
            ..StateSnapshot::default()
        };

        for name in payload.results.keys() {
            if let Some(status) = self.ignored_status(name) {
                log::warn!("t={} ignoring results for {status} subscription '{name}'", payload.time);
            }
        }

        for entry in self
            .entries
            .iter()
            .filter(|e| e.activation == Activation::Active)
        {
            let sub = &entry.subscription;
            let raw = payload
                .results
                .get(&sub.name)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let mut records = Vec::with_capacity(raw.len());
            for raw_entity in raw {
                match sub.decode(raw_entity) {
                    Ok(record) => records.push(record),
                    Err(reason) => {
                        let err = ControlError::UnknownEntity {
                            subscription: sub.name.clone(),
                            entity_id:    raw_entity.id.clone(),
                            reason,
                        };
                        log::warn!("t={} dropped entity: {err}", payload.time);
                        snapshot.dropped += 1;
                    }
                }
            }
            snapshot.subscriptions.insert(sub.name.clone(), records);
        }

        for records in snapshot.subscriptions.values() {
            self.seen.extend(records.iter().map(|r| r.id.clone()));
        }
        self.latest = snapshot.subscriptions.clone();
        snapshot
    }

    /// Last resolved records for `name`, empty if nothing resolved yet.
    pub fn latest(&self, name: &str) -> &[EntityRecord] {
        self.latest.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest_default(&self) -> &[EntityRecord] {
        match &self.default {
            Some(name) => self.latest(name),
            None => &[],
        }
    }

    /// True if `id` appeared in any snapshot resolved so far.
    pub fn known_entity(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Why results for `name` are not resolved, or None if they are.
    fn ignored_status(&self, name: &str) -> Option<&'static str> {
        match self.find(name) {
            None => Some("unknown"),
            Some(e) if e.activation != Activation::Active => Some("inactive"),
            Some(_) => None,
        }
    }

    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.subscription.name == name)
    }
}
