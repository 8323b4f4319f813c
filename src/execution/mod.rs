//! Flow Execution Module
//!
//! The tick-driven coroutine scheduler at the heart of the simulator.
//!
//! # Architecture
//!
//! - [`protocol`]: The instrumented-method step contract and its commands
//! - [`stack`]: Per-flow call stack records and pending operations
//! - [`step`]: A single coroutine step interpreted against the stack
//! - [`flow`]: Flow lifecycle, await resolution and cascading cancellation
//! - [`scheduler`]: Timers and intervals that spawn flows
//! - [`autopop`]: Buffering of traffic internal to a collapsed effect
//! - [`result`]: Data handed to the visualization layer
//! - [`runtime`]: The tick loop tying everything together

pub mod autopop;
pub mod flow;
pub mod protocol;
pub mod result;
pub mod runtime;
pub mod scheduler;
pub mod stack;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

/// Discrete unit of simulated time.
pub type Tick = u64;

pub type FlowId = u64;

pub type TaskId = u64;

pub use autopop::AutoPopManager;
pub use flow::{AwaitFlowInstruction, CancelledFlow, CompletedFlow, FlowManager, FlowParams};
pub use protocol::{
    AwaitRequest, AwaitStrategy, Command, CommandKind, Coroutine, CoroutineFactory, CoroutineState,
    FlowRecipe, Resume,
};
pub use result::{Entities, ResponseKind, TickResponse, TickResult, TickResultContainer};
pub use runtime::{Runtime, RuntimeConfig};
pub use scheduler::ScheduledTaskManager;
pub use stack::ExecutionStack;
