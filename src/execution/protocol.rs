//! Instrumented-Method Protocol
//!
//! The compiler rewrites every runnable method into a resumable coroutine.
//! The engine steps it with a [`Resume`] input and gets back either a
//! [`Command`] or the final return value. Nested calls to other
//! instrumented methods run inside the same coroutine and announce
//! themselves through their own LOAD/UNLOAD pair.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Address;

/// Input handed to a coroutine on each step.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First step of a flow: the arguments of the entry method
    Params(Vec<Value>),
    /// Value of a resolved await
    Given(Value),
    /// Return value of the method that was just unloaded
    ReturnValue(Value),
    /// Nothing to inject
    Continue,
}

/// Result of a single coroutine step.
#[derive(Debug, Clone)]
pub enum CoroutineState {
    Yielded(Command),
    Complete(Value),
}

/// A resumable, explicitly stepped method body.
pub trait Coroutine {
    fn resume(&mut self, input: Resume) -> Result<CoroutineState, String>;
}

/// How a suspension resolves against its awaited flows.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AwaitStrategy {
    /// Exactly one flow; resumes with its value
    #[default]
    Single,
    /// Resumes with every value, in await order
    WaitForAll,
    /// Resumes with the first completed value and cancels the rest
    Race,
}

impl fmt::Display for AwaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "SINGLE"),
            Self::WaitForAll => write!(f, "WAIT_FOR_ALL"),
            Self::Race => write!(f, "RACE"),
        }
    }
}

/// Builds a fresh coroutine for a flow.
pub type CoroutineFactory = Rc<dyn Fn() -> Box<dyn Coroutine>>;

/// Everything needed to start a flow: a display name, entry arguments and
/// a factory producing the coroutine bound to its target.
#[derive(Clone)]
pub struct FlowRecipe {
    pub name: String,
    pub args: Vec<Value>,
    factory: CoroutineFactory,
}

impl FlowRecipe {
    pub fn new(name: impl Into<String>, args: Vec<Value>, factory: CoroutineFactory) -> Self {
        Self {
            name: name.into(),
            args,
            factory,
        }
    }

    /// Creates a recipe from a closure.
    pub fn from_fn<F>(name: impl Into<String>, args: Vec<Value>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Coroutine> + 'static,
    {
        Self::new(name, args, Rc::new(factory))
    }

    /// Same recipe under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: self.args.clone(),
            factory: Rc::clone(&self.factory),
        }
    }

    pub fn instantiate(&self) -> Box<dyn Coroutine> {
        (self.factory)()
    }
}

impl fmt::Debug for FlowRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRecipe")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Payload of an AWAIT_FLOW command: the calls to run as separate flows.
#[derive(Debug, Clone)]
pub struct AwaitRequest {
    pub strategy: AwaitStrategy,
    /// Whether the awaited value is consumed by the caller
    pub is_dependency: bool,
    pub dependencies: Vec<FlowRecipe>,
}

/// One yielded command. `address` is the starting address of the method
/// that issued it.
#[derive(Debug, Clone)]
pub struct Command {
    pub address: Address,
    pub kind: CommandKind,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
    /// Method entry. `is_dependency` marks a call whose value the caller consumes;
    /// it is ignored for a flow's entry method, which inherits the flag from
    /// whoever spawned the flow.
    Load {
        params: Vec<Value>,
        is_dependency: bool,
    },
    Log {
        logs: Vec<Value>,
    },
    /// One tick of cooperative sleep
    Halt {
        covered_halts: u32,
        halted_for: u32,
    },
    AwaitFlow(AwaitRequest),
    Unload {
        return_value: Value,
    },
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Load { .. } => "LOAD",
            Self::Log { .. } => "LOG",
            Self::Halt { .. } => "HALT",
            Self::AwaitFlow(_) => "AWAIT_FLOW",
            Self::Unload { .. } => "UNLOAD",
        }
    }
}
