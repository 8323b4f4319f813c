//! Single Coroutine Step
//!
//! Steps a flow's coroutine once, injecting whatever the top stack record
//! asks for, and interprets the yielded command against the stack:
//! - LOAD pushes a frame and, for in-flow calls, emits a SEND_DATA or
//!   CALL_DEPENDENCY edge from the calling frame
//! - UNLOAD schedules the frame's return value for hand-back and, for
//!   dependency frames, emits RESOLVE_DEPENDENCY to the calling frame
//! - LOG and HALT pass through
//! - AWAIT_FLOW is returned to the caller for suspension
//!
//! Any shape the protocol does not allow is a fatal [`RuntimeError`].

use log::debug;
use serde_json::Value;

use super::flow::Flow;
use super::protocol::{AwaitRequest, Command, CommandKind, CoroutineState, Resume};
use super::result::{ResponseKind, TickResponse};
use super::stack::{ExecutionStackRecord, StackOperation};
use super::Tick;
use crate::error::RuntimeError;
use crate::memory::{Address, Heap};

/// Where a step left the flow.
#[derive(Debug)]
pub enum Boundary {
    /// Keep stepping within this tick
    Continue,
    /// Slept for one tick
    Halt,
    /// Wants to suspend on other flows
    Await { request: AwaitRequest, caller: Address },
    /// Coroutine finished
    Complete {
        return_value: Value,
        last_address: Option<Address>,
    },
}

#[derive(Debug)]
pub struct StepOutcome {
    pub responses: Vec<TickResponse>,
    pub boundary: Boundary,
}

/// Steps the flow's coroutine once.
pub fn execute_stack(flow: &mut Flow, heap: &mut Heap, tick: Tick) -> Result<StepOutcome, RuntimeError> {
    let (input, popped) = next_input(flow)?;

    match flow.resume(input)? {
        CoroutineState::Complete(return_value) => {
            if popped.is_none() {
                return Err(RuntimeError::MissingUnload { flow_id: flow.id });
            }
            let open_frames = flow.stack.len().saturating_sub(1);
            if open_frames > 0 {
                return Err(RuntimeError::UnbalancedStack {
                    flow_id: flow.id,
                    open_frames,
                });
            }
            Ok(StepOutcome {
                responses: Vec::new(),
                boundary: Boundary::Complete {
                    return_value,
                    last_address: popped,
                },
            })
        }
        CoroutineState::Yielded(command) => {
            debug!(
                "Flow {} yielded {} at {}",
                flow.id,
                command.kind.label(),
                command.address
            );
            interpret(flow, heap, command, tick)
        }
    }
}

/// Consumes the top record's next operation and turns it into coroutine input.
///
/// Also returns the address of the frame popped on the way, if any.
fn next_input(flow: &mut Flow) -> Result<(Resume, Option<Address>), RuntimeError> {
    let operation = flow.stack.peek_mut(0)?.operations.pop_front();

    Ok(match operation {
        Some(StackOperation::ProvideParams) => {
            (Resume::Params(flow.stack.peek(0)?.params.clone()), None)
        }
        Some(StackOperation::ProvideGivenParams(value)) => (Resume::Given(value), None),
        Some(StackOperation::ProvideReturnValueAndPop) => {
            let frame = flow.stack.pop()?;
            (
                Resume::ReturnValue(frame.return_value.unwrap_or(Value::Null)),
                frame.address,
            )
        }
        None => (Resume::Continue, None),
    })
}

fn interpret(flow: &mut Flow, heap: &mut Heap, command: Command, tick: Tick) -> Result<StepOutcome, RuntimeError> {
    let Command { address, kind } = command;
    let mut responses = Vec::new();
    let mut boundary = Boundary::Continue;

    match kind {
        CommandKind::Load {
            params,
            is_dependency,
        } => {
            let caller = flow.stack.peek(0)?;
            let (is_dependency, edge_from) = if caller.is_frame() {
                (is_dependency, caller.address.clone())
            } else {
                // Entry method: the spawner decides, and the spawn edge is synthesized separately
                (caller.is_dependency, None)
            };

            if heap.get(&address.object).is_none() {
                return Err(RuntimeError::UnregisteredInstance {
                    flow_id: flow.id,
                    object: address.object.clone(),
                });
            }
            if !heap.can_translate_address(&address) {
                heap.set_address_translation(&address, address.location());
            }

            if let Some(from) = edge_from {
                responses.push(TickResponse::new(
                    call_edge(from, address.clone(), params.clone(), is_dependency),
                    tick,
                ));
            }
            responses.push(TickResponse::new(
                ResponseKind::Load {
                    address: address.clone(),
                    params: params.clone(),
                },
                tick,
            ));
            flow.stack
                .push(ExecutionStackRecord::frame(address, params, is_dependency));
        }
        CommandKind::Log { logs } => {
            expect_current_frame(flow, &address, "LOG")?;
            responses.push(TickResponse::new(ResponseKind::Log { address, logs }, tick));
        }
        CommandKind::Halt {
            covered_halts,
            halted_for,
        } => {
            expect_current_frame(flow, &address, "HALT")?;
            if covered_halts == 0 || covered_halts > halted_for {
                return Err(RuntimeError::InvalidHalt {
                    flow_id: flow.id,
                    covered: covered_halts,
                    total: halted_for,
                });
            }
            responses.push(TickResponse::new(
                ResponseKind::Halt {
                    address,
                    covered_halts,
                    halted_for,
                },
                tick,
            ));
            boundary = Boundary::Halt;
        }
        CommandKind::AwaitFlow(request) => {
            expect_current_frame(flow, &address, "AWAIT_FLOW")?;
            boundary = Boundary::Await {
                request,
                caller: address,
            };
        }
        CommandKind::Unload { return_value } => {
            expect_current_frame(flow, &address, "UNLOAD")?;
            let frame = flow.stack.peek_mut(0)?;
            frame.return_value = Some(return_value.clone());
            frame
                .operations
                .push_back(StackOperation::ProvideReturnValueAndPop);
            let is_dependency = frame.is_dependency;

            responses.push(TickResponse::new(
                ResponseKind::Unload {
                    address: address.clone(),
                    return_value: return_value.clone(),
                },
                tick,
            ));

            if is_dependency {
                let below = flow.stack.peek(1)?;
                if let (true, Some(to)) = (below.is_frame(), below.address.clone()) {
                    responses.push(TickResponse::new(
                        ResponseKind::ResolveDependency {
                            from: address,
                            to,
                            value: return_value,
                        },
                        tick,
                    ));
                }
            }
        }
    }

    Ok(StepOutcome {
        responses,
        boundary,
    })
}

/// SEND_DATA or CALL_DEPENDENCY depending on whether the value is consumed.
pub fn call_edge(from: Address, to: Address, params: Vec<Value>, is_dependency: bool) -> ResponseKind {
    if is_dependency {
        ResponseKind::CallDependency { from, to, params }
    } else {
        ResponseKind::SendData { from, to, params }
    }
}

fn expect_current_frame(flow: &Flow, address: &Address, command: &'static str) -> Result<(), RuntimeError> {
    let top = flow.stack.peek(0)?;
    if !top.is_frame() {
        return Err(RuntimeError::NoLoadedFrame {
            flow_id: flow.id,
            command,
        });
    }
    match &top.address {
        Some(current) if current == address => Ok(()),
        current => Err(RuntimeError::AddressMismatch {
            flow_id: flow.id,
            command,
            expected: current.as_ref().map(Address::location).unwrap_or_default(),
            found: address.location(),
        }),
    }
}
