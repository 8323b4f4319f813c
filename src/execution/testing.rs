//! Test helpers: a coroutine that replays a fixed command list.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;

use super::protocol::{
    AwaitRequest, AwaitStrategy, Command, CommandKind, Coroutine, CoroutineState, FlowRecipe,
    Resume,
};
use crate::memory::{Address, Heap, ObjectInstance};

/// Replays `commands` in order, ignoring its inputs except for recording
/// them, then completes with the last return value it was handed.
pub struct ScriptedCoroutine {
    commands: VecDeque<Command>,
    last_return: Value,
    inputs: Rc<RefCell<Vec<Resume>>>,
}

impl ScriptedCoroutine {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands: commands.into(),
            last_return: Value::Null,
            inputs: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn recording(commands: Vec<Command>, inputs: Rc<RefCell<Vec<Resume>>>) -> Self {
        Self {
            commands: commands.into(),
            last_return: Value::Null,
            inputs,
        }
    }
}

impl Coroutine for ScriptedCoroutine {
    fn resume(&mut self, input: Resume) -> Result<CoroutineState, String> {
        if let Resume::ReturnValue(value) = &input {
            self.last_return = value.clone();
        }
        self.inputs.borrow_mut().push(input);
        Ok(match self.commands.pop_front() {
            Some(command) => CoroutineState::Yielded(command),
            None => CoroutineState::Complete(self.last_return.clone()),
        })
    }
}

/// Registers a plain object at each of `addresses` so flows may load methods on them.
pub fn register_objects(heap: &mut Heap, addresses: &[&str]) {
    for &address in addresses {
        let class = address.split('_').next().unwrap_or(address);
        heap.register_instance_at(address, Box::new(ObjectInstance::new(class)));
    }
}

pub fn recipe(name: &str, commands: Vec<Command>) -> FlowRecipe {
    FlowRecipe::from_fn(name, vec![], move || Box::new(ScriptedCoroutine::new(commands.clone())))
}

/// Recipe whose coroutines record every input into `inputs`.
pub fn recording_recipe(
    name: &str,
    commands: Vec<Command>,
    inputs: Rc<RefCell<Vec<Resume>>>,
) -> FlowRecipe {
    FlowRecipe::from_fn(name, vec![], move || {
        Box::new(ScriptedCoroutine::recording(commands.clone(), Rc::clone(&inputs)))
    })
}

/// Recipe that completes on its first step without loading anything.
pub fn idle_recipe(name: &str) -> FlowRecipe {
    recipe(name, vec![])
}

/// A method that loads and immediately returns `value`.
pub fn method_recipe(name: &str, address: Address, value: Value) -> FlowRecipe {
    recipe(name, vec![load(&address, false), unload(&address, value)])
}

/// A method that sleeps `ticks` ticks, then returns `value`.
pub fn sleeper_recipe(name: &str, address: Address, ticks: u32, value: Value) -> FlowRecipe {
    let mut commands = vec![load(&address, false)];
    commands.extend(sleep(&address, ticks));
    commands.push(unload(&address, value));
    recipe(name, commands)
}

pub fn load(address: &Address, is_dependency: bool) -> Command {
    Command {
        address: address.clone(),
        kind: CommandKind::Load {
            params: vec![],
            is_dependency,
        },
    }
}

pub fn unload(address: &Address, value: Value) -> Command {
    Command {
        address: address.clone(),
        kind: CommandKind::Unload {
            return_value: value,
        },
    }
}

pub fn log(address: &Address, message: &str) -> Command {
    Command {
        address: address.clone(),
        kind: CommandKind::Log {
            logs: vec![Value::from(message)],
        },
    }
}

/// HALT commands for `sleep(ticks)`.
pub fn sleep(address: &Address, ticks: u32) -> Vec<Command> {
    (1..=ticks)
        .map(|covered| Command {
            address: address.clone(),
            kind: CommandKind::Halt {
                covered_halts: covered,
                halted_for: ticks,
            },
        })
        .collect()
}

pub fn await_flows(
    address: &Address,
    strategy: AwaitStrategy,
    dependencies: Vec<FlowRecipe>,
) -> Command {
    Command {
        address: address.clone(),
        kind: CommandKind::AwaitFlow(AwaitRequest {
            strategy,
            is_dependency: true,
            dependencies,
        }),
    }
}
