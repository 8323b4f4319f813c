//! Engine Error Types
//!
//! Every variant of [`RuntimeError`] is a protocol violation: the compiled
//! bundle or the bootstrap layer broke the instrumented-method contract, or
//! the engine itself is inconsistent. None of them are retried. Ordinary
//! simulation outcomes (completion, cancellation, halting) are reported as
//! data through [`crate::execution::TickResult`] instead.

use thiserror::Error;

use crate::execution::FlowId;

/// Fatal engine error raised out of [`crate::Runtime::tick`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("flow {flow_id}: execution stack underflow (runtime/compiler mismatch, please report it)")]
    StackUnderflow { flow_id: FlowId },

    #[error("flow {flow_id}: peek({requested}) beyond stack depth {depth} (runtime/compiler mismatch, please report it)")]
    StackPeekOutOfRange {
        flow_id: FlowId,
        depth: usize,
        requested: usize,
    },

    #[error("flow {flow_id} is not active (runtime/compiler mismatch, please report it)")]
    NotActive { flow_id: FlowId },

    #[error("flow {flow_id} is already suspended (runtime/compiler mismatch, please report it)")]
    AlreadySuspended { flow_id: FlowId },

    #[error("flow {flow_id} cannot be cancelled: it is neither active nor suspended (runtime/compiler mismatch, please report it)")]
    CancelNotAlive { flow_id: FlowId },

    #[error("flow {flow_id} loaded a method on '{object}', which was never registered on the heap (runtime/compiler mismatch, please report it)")]
    UnregisteredInstance { flow_id: FlowId, object: String },

    #[error("page fault: no node registered for address '{location}' (runtime/compiler mismatch, please report it)")]
    PageFault { location: String },

    #[error("flow {flow_id} finished without a preceding UNLOAD (runtime/compiler mismatch, please report it)")]
    MissingUnload { flow_id: FlowId },

    #[error("flow {flow_id} finished with {open_frames} open frame(s) (runtime/compiler mismatch, please report it)")]
    UnbalancedStack { flow_id: FlowId, open_frames: usize },

    #[error("flow {flow_id}: {command} issued at '{found}' but the current frame is '{expected}' (runtime/compiler mismatch, please report it)")]
    AddressMismatch {
        flow_id: FlowId,
        command: &'static str,
        expected: String,
        found: String,
    },

    #[error("flow {flow_id}: {command} issued before any method was loaded (runtime/compiler mismatch, please report it)")]
    NoLoadedFrame {
        flow_id: FlowId,
        command: &'static str,
    },

    #[error("flow {flow_id} was marked resumed but never received its awaited value (runtime/compiler mismatch, please report it)")]
    ResumeWithoutSuspension { flow_id: FlowId },

    #[error("flow {flow_id}: invalid await: {reason} (runtime/compiler mismatch, please report it)")]
    InvalidAwait { flow_id: FlowId, reason: String },

    #[error("flow {flow_id}: HALT {covered}/{total} is out of range (runtime/compiler mismatch, please report it)")]
    InvalidHalt {
        flow_id: FlowId,
        covered: u32,
        total: u32,
    },

    #[error("flow {flow_id}: coroutine step failed: {message} (runtime/compiler mismatch, please report it)")]
    Coroutine { flow_id: FlowId, message: String },

    #[error("scheduled task {task_id} does not exist (runtime/compiler mismatch, please report it)")]
    UnknownTask { task_id: u64 },

    #[error("tick {tick} did not reach a fixed point within {rounds} rounds")]
    TickBudgetExceeded { tick: u64, rounds: usize },

    #[error("flow {flow_id} did not reach a tick boundary within {steps} steps")]
    StepBudgetExceeded { flow_id: FlowId, steps: usize },
}

impl RuntimeError {
    /// Returns true for the two guard errors raised by the configured
    /// step/round budgets rather than by a contract breach.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            Self::TickBudgetExceeded { .. } | Self::StepBudgetExceeded { .. }
        )
    }
}
