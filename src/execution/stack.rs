//! Execution Stack
//!
//! Per-flow call stack. The bottom record is the flow's entry record: it
//! holds the address of whoever spawned the flow (if anyone) and the
//! entry arguments. Every LOAD pushes a method frame on top of it and the
//! frame is popped once its return value has been handed back to the
//! coroutine.

use std::collections::VecDeque;

use serde_json::Value;

use super::FlowId;
use crate::error::RuntimeError;
use crate::memory::Address;

/// What to inject into the coroutine on its next step.
#[derive(Debug, Clone, PartialEq)]
pub enum StackOperation {
    /// Hand over the record's params (entry step)
    ProvideParams,
    /// Hand over a value resolved by an await
    ProvideGivenParams(Value),
    /// Hand over the frame's return value, then pop it
    ProvideReturnValueAndPop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Bottom record created with the flow
    Entry,
    /// A loaded method
    Frame,
}

/// One call frame.
#[derive(Debug, Clone)]
pub struct ExecutionStackRecord {
    pub kind: RecordKind,
    /// Method address for frames; the spawning caller for the entry record
    pub address: Option<Address>,
    pub params: Vec<Value>,
    /// Whether the caller consumes this frame's return value
    pub is_dependency: bool,
    pub return_value: Option<Value>,
    pub operations: VecDeque<StackOperation>,
}

impl ExecutionStackRecord {
    /// Bottom record of a new flow, primed with [`StackOperation::ProvideParams`].
    pub fn entry(caller: Option<Address>, params: Vec<Value>, is_dependency: bool) -> Self {
        Self {
            kind: RecordKind::Entry,
            address: caller,
            params,
            is_dependency,
            return_value: None,
            operations: VecDeque::from([StackOperation::ProvideParams]),
        }
    }

    pub fn frame(address: Address, params: Vec<Value>, is_dependency: bool) -> Self {
        Self {
            kind: RecordKind::Frame,
            address: Some(address),
            params,
            is_dependency,
            return_value: None,
            operations: VecDeque::new(),
        }
    }

    pub fn is_frame(&self) -> bool {
        self.kind == RecordKind::Frame
    }
}

/// LIFO of call records owned by one flow.
#[derive(Debug, Clone)]
pub struct ExecutionStack {
    flow_id: FlowId,
    records: Vec<ExecutionStackRecord>,
}

impl ExecutionStack {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ExecutionStackRecord) {
        self.records.push(record);
    }

    pub fn pop(&mut self) -> Result<ExecutionStackRecord, RuntimeError> {
        self.records.pop().ok_or(RuntimeError::StackUnderflow {
            flow_id: self.flow_id,
        })
    }

    /// Record `n` positions below the top (`peek(0)` is the top).
    pub fn peek(&self, n: usize) -> Result<&ExecutionStackRecord, RuntimeError> {
        let index = self.index_from_top(n)?;
        Ok(&self.records[index])
    }

    pub fn peek_mut(&mut self, n: usize) -> Result<&mut ExecutionStackRecord, RuntimeError> {
        let index = self.index_from_top(n)?;
        Ok(&mut self.records[index])
    }

    /// Bottom record, used to trace a flow back to its original caller.
    pub fn get_root(&self) -> Result<&ExecutionStackRecord, RuntimeError> {
        self.records.first().ok_or(RuntimeError::StackUnderflow {
            flow_id: self.flow_id,
        })
    }

    /// Addresses of loaded frames, bottom to top.
    pub fn open_frames(&self) -> Vec<Address> {
        self.records
            .iter()
            .filter(|r| r.is_frame())
            .filter_map(|r| r.address.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index_from_top(&self, n: usize) -> Result<usize, RuntimeError> {
        if n >= self.records.len() {
            return Err(RuntimeError::StackPeekOutOfRange {
                flow_id: self.flow_id,
                depth: self.records.len(),
                requested: n,
            });
        }
        Ok(self.records.len() - 1 - n)
    }
}
