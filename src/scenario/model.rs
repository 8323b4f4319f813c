//! Scenario Data Model
//!
//! A scenario declares a handful of services, their methods as small
//! instruction lists, and what to run: entry calls, timers and intervals.
//!
//! # Example YAML Format
//!
//! ```yaml
//! runtime:
//!   max_rounds_per_tick: 1000
//!
//! services:
//!   - name: Api
//!     fields: { region: eu }
//!     methods:
//!       - name: handle
//!         params: [user]
//!         body:
//!           - log: [handling, $user]
//!           - call: { service: Db, method: query, args: [$user], bind: rows }
//!           - await:
//!               strategy: race
//!               calls:
//!                 - { service: Cache, method: get, args: [$user] }
//!                 - { service: Db, method: slow_get, args: [$user] }
//!               bind: fastest
//!           - return: $fastest
//!
//! entry:
//!   - { service: Api, method: handle, args: [alice] }
//!
//! intervals:
//!   - name: heartbeat
//!     every: 5
//!     call: { service: Api, method: ping }
//!
//! effects:
//!   - id: storage
//!     nodes: [Db.query, Db.slow_get]
//! ```
//!
//! A string of the form `$name` anywhere in a value is replaced by the
//! method local `name`: a service field, a parameter or a bound result.

use serde::de::Deserializer;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::execution::{AwaitStrategy, RuntimeConfig};

/// A complete declarative scenario.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Scenario {
    /// Tick loop bounds
    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,

    pub services: Vec<ServiceDef>,

    /// Calls started as root flows on tick 0
    #[serde(default)]
    pub entry: Vec<CallDef>,

    #[serde(default)]
    pub timers: Vec<TimerDef>,

    #[serde(default)]
    pub intervals: Vec<IntervalDef>,

    /// Collapsed containers, by `Service.method` node id
    #[serde(default)]
    pub effects: Vec<EffectDef>,
}

/// One object on the simulated heap, with its methods.
#[derive(Deserialize, Debug, Clone)]
pub struct ServiceDef {
    pub name: String,

    /// Class name used for hashing; defaults to `name`
    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub fields: Map<String, Value>,

    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ServiceDef {
    pub fn class_name(&self) -> &str {
        self.class.as_deref().unwrap_or(&self.name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MethodDef {
    pub name: String,

    #[serde(default)]
    pub params: Vec<String>,

    #[serde(default)]
    pub body: Vec<Instruction>,
}

/// Invocation of `service.method(args)`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CallDef {
    pub service: String,
    pub method: String,

    #[serde(default)]
    pub args: Vec<Value>,

    /// Local that receives the return value; a bound call is a dependency
    #[serde(default)]
    pub bind: Option<String>,
}

impl CallDef {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            args: Vec::new(),
            bind: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn bound_to(mut self, name: impl Into<String>) -> Self {
        self.bind = Some(name.into());
        self
    }

    /// Node id of the target, as used by effects and address translation.
    pub fn node_id(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AwaitDef {
    #[serde(default)]
    pub strategy: AwaitStrategy,

    pub calls: Vec<CallDef>,

    #[serde(default)]
    pub bind: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TimerDef {
    pub name: String,
    /// Ticks until the timer fires
    pub after: u64,
    pub call: CallDef,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IntervalDef {
    pub name: String,
    /// Period in ticks
    pub every: u64,
    pub call: CallDef,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EffectDef {
    pub id: String,
    pub nodes: Vec<String>,
}

/// One statement of a method body.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawInstruction")]
pub enum Instruction {
    /// Emit a log line; an array logs several values
    Log(Value),
    /// Cooperative sleep for N ticks
    Sleep(u32),
    /// Synchronous call to another method
    Call(CallDef),
    /// Run calls as separate flows and suspend until they resolve
    Await(AwaitDef),
    /// Return from the method
    Return(Value),
}

/// Single-key mapping form of [`Instruction`] as written in YAML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInstruction {
    #[serde(default, deserialize_with = "present")]
    log: Option<Value>,
    #[serde(default)]
    sleep: Option<u32>,
    #[serde(default)]
    call: Option<CallDef>,
    #[serde(default, rename = "await")]
    await_: Option<AwaitDef>,
    #[serde(default, rename = "return", deserialize_with = "present")]
    return_: Option<Value>,
}

/// Keeps an explicit `null` distinguishable from a missing key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawInstruction> for Instruction {
    type Error = String;

    fn try_from(raw: RawInstruction) -> Result<Self, Self::Error> {
        let mut found = Vec::new();
        if let Some(value) = raw.log {
            found.push(Instruction::Log(value));
        }
        if let Some(ticks) = raw.sleep {
            found.push(Instruction::Sleep(ticks));
        }
        if let Some(call) = raw.call {
            found.push(Instruction::Call(call));
        }
        if let Some(await_def) = raw.await_ {
            found.push(Instruction::Await(await_def));
        }
        if let Some(value) = raw.return_ {
            found.push(Instruction::Return(value));
        }

        if found.len() != 1 {
            return Err(format!(
                "instruction must have exactly one of log, sleep, call, await, return (found {})",
                found.len()
            ));
        }
        Ok(found.remove(0))
    }
}

/// Every `$name` reference inside a value, in document order.
pub fn variable_refs(value: &Value) -> Vec<&str> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs
}

fn collect_refs<'a>(value: &'a Value, refs: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                refs.push(name);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, refs)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, refs)),
        _ => {}
    }
}

/// Replaces `$name` strings with locals, recursively.
pub fn substitute(value: &Value, locals: &Map<String, Value>) -> Result<Value, String> {
    Ok(match value {
        Value::String(s) => match s.strip_prefix('$') {
            Some(name) => locals
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unbound variable '${}'", name))?,
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, locals))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), substitute(v, locals)?)))
                .collect::<Result<_, String>>()?,
        ),
        other => other.clone(),
    })
}
