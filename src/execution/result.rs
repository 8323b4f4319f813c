//! Tick Results
//!
//! Data handed to the visualization layer after every tick. Completion,
//! cancellation and halting are ordinary values here, never errors.

use serde::Serialize;
use serde_json::Value;

use super::flow::{CancelledFlow, CompletedFlow, FlowSummary, SuspendedSummary};
use super::scheduler::TaskSummary;
use super::{FlowId, Tick};
use crate::memory::Address;

/// What happened, in visual terms.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    Load {
        address: Address,
        params: Vec<Value>,
    },
    Log {
        address: Address,
        logs: Vec<Value>,
    },
    /// Call whose return value is not consumed
    SendData {
        from: Address,
        to: Address,
        params: Vec<Value>,
    },
    /// Call whose return value the caller waits for
    CallDependency {
        from: Address,
        to: Address,
        params: Vec<Value>,
    },
    /// Return value travelling back to a dependency caller
    ResolveDependency {
        from: Address,
        to: Address,
        value: Value,
    },
    Unload {
        address: Address,
        return_value: Value,
    },
    Halt {
        address: Address,
        covered_halts: u32,
        halted_for: u32,
    },
}

impl ResponseKind {
    /// Every address the response touches, source first.
    pub fn addresses(&self) -> Vec<&Address> {
        match self {
            Self::Load { address, .. }
            | Self::Log { address, .. }
            | Self::Unload { address, .. }
            | Self::Halt { address, .. } => vec![address],
            Self::SendData { from, to, .. }
            | Self::CallDependency { from, to, .. }
            | Self::ResolveDependency { from, to, .. } => vec![from, to],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Load { .. } => "LOAD",
            Self::Log { .. } => "LOG",
            Self::SendData { .. } => "SEND_DATA",
            Self::CallDependency { .. } => "CALL_DEPENDENCY",
            Self::ResolveDependency { .. } => "RESOLVE_DEPENDENCY",
            Self::Unload { .. } => "UNLOAD",
            Self::Halt { .. } => "HALT",
        }
    }
}

/// One response stamped with its tick.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TickResponse {
    #[serde(flatten)]
    pub kind: ResponseKind,
    pub tick: Tick,
    pub is_auto_pop: bool,
}

impl TickResponse {
    pub fn new(kind: ResponseKind, tick: Tick) -> Self {
        Self {
            kind,
            tick,
            is_auto_pop: false,
        }
    }
}

/// One externally visible unit of progress.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickResult {
    /// The flow produced 1..n responses
    Yielded {
        flow_id: FlowId,
        flow_name: String,
        responses: Vec<TickResponse>,
    },
    /// The flow ran to completion, possibly cancelling RACE losers on the way
    Constructed {
        flow_id: FlowId,
        flow_name: String,
        return_value: Value,
        cancelled: Vec<CancelledFlow>,
    },
}

impl TickResult {
    pub fn flow_id(&self) -> FlowId {
        match self {
            Self::Yielded { flow_id, .. } | Self::Constructed { flow_id, .. } => *flow_id,
        }
    }

    pub fn responses(&self) -> &[TickResponse] {
        match self {
            Self::Yielded { responses, .. } => responses,
            Self::Constructed { .. } => &[],
        }
    }
}

/// Everything one call to [`crate::Runtime::tick`] produced.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct TickResultContainer {
    pub tick: Tick,
    pub results: Vec<TickResult>,
}

impl TickResultContainer {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            results: Vec::new(),
        }
    }

    /// All responses in order, across every result.
    pub fn responses(&self) -> impl Iterator<Item = &TickResponse> {
        self.results.iter().flat_map(|r| r.responses().iter())
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Marks every response as fast-forward replay material.
    pub fn mark_auto_pop(&mut self) {
        for result in &mut self.results {
            if let TickResult::Yielded { responses, .. } = result {
                for response in responses {
                    response.is_auto_pop = true;
                }
            }
        }
    }
}

/// Live console snapshot of the engine.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct Entities {
    pub tick: Tick,
    pub active: Vec<FlowSummary>,
    pub suspended: Vec<SuspendedSummary>,
    pub completed: Vec<CompletedFlow>,
    pub cancelled: Vec<CancelledFlow>,
    pub scheduled_tasks: Vec<TaskSummary>,
    pub completed_tasks: Vec<TaskSummary>,
}

impl Entities {
    /// True when nothing is alive and nothing has ever run.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
            && self.suspended.is_empty()
            && self.completed.is_empty()
            && self.cancelled.is_empty()
            && self.scheduled_tasks.is_empty()
            && self.completed_tasks.is_empty()
    }
}
