//! Runtime Tick Loop
//!
//! Owns the heap and the three managers and advances the simulation one
//! tick at a time.
//!
//! A tick runs in rounds. Each round steps every scheduled task and every
//! active flow activation not yet covered this tick; a round can make new
//! work eligible (a spawned dependency, a resumed waiter), so rounds repeat
//! until a fixed point is reached. Only then does the tick counter advance.
//!
//! Within one round a flow is stepped until it reaches a boundary: it
//! sleeps (HALT), suspends (AWAIT_FLOW) or completes. Steps whose traffic
//! stays inside a single collapsed effect are buffered in the
//! [`AutoPopManager`] instead of being surfaced.

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::autopop::AutoPopManager;
use super::flow::{validate_await_shape, AwaitFlowInstruction, FlowManager, FlowParams};
use super::protocol::FlowRecipe;
use super::result::{Entities, ResponseKind, TickResponse, TickResult, TickResultContainer};
use super::scheduler::ScheduledTaskManager;
use super::stack::StackOperation;
use super::step::{call_edge, execute_stack, Boundary};
use super::{FlowId, TaskId, Tick};
use crate::error::RuntimeError;
use crate::memory::{Heap, Instance};

/// Default bound on rounds within one tick.
const DEFAULT_MAX_ROUNDS_PER_TICK: usize = 10_000;

/// Default bound on steps of one flow activation within one round.
const DEFAULT_MAX_STEPS_PER_FLOW: usize = 100_000;

/// Safety bounds for the tick loop.
///
/// A workload that keeps spawning new work within a tick (for example a
/// method awaiting a fresh copy of itself) never reaches a fixed point;
/// the bounds turn that into an error instead of a hang.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_rounds_per_tick: usize,
    pub max_steps_per_flow: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rounds_per_tick: DEFAULT_MAX_ROUNDS_PER_TICK,
            max_steps_per_flow: DEFAULT_MAX_STEPS_PER_FLOW,
        }
    }
}

/// One simulated session.
///
/// # Example
///
/// ```rust
/// use tickflow::execution::{Runtime, RuntimeConfig};
///
/// let mut runtime = Runtime::with_config(RuntimeConfig::default());
/// assert!(runtime.is_idle());
///
/// let container = runtime.tick().unwrap();
/// assert_eq!(container.tick, 0);
/// assert_eq!(runtime.current_tick(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Runtime {
    heap: Heap,
    flows: FlowManager,
    tasks: ScheduledTaskManager,
    auto_pop: AutoPopManager,
    current_tick: Tick,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config
    }

    pub fn set_config(&mut self, config: RuntimeConfig) {
        self.config = config;
    }

    /// Allocates a heap address for a freshly constructed object.
    pub fn register_instance(&mut self, instance: Box<dyn Instance>) -> String {
        self.heap.register_instance(instance)
    }

    /// Starts a root flow at the current tick.
    pub fn spawn_flow(&mut self, recipe: FlowRecipe) -> FlowId {
        info!("Spawning flow '{}' at tick {}", recipe.name, self.current_tick);
        self.flows
            .create_flow(FlowParams::root(), &recipe, self.current_tick)
    }

    pub fn schedule_timer(&mut self, name: impl Into<String>, after: u64, recipe: FlowRecipe) -> TaskId {
        self.tasks.add_timer(name, after, recipe, self.current_tick)
    }

    pub fn schedule_interval(&mut self, name: impl Into<String>, every: u64, recipe: FlowRecipe) -> TaskId {
        self.tasks
            .add_interval(name, every, recipe, self.current_tick)
    }

    /// Registers a collapsed container before ticking.
    pub fn add_auto_pop_effect(&mut self, effect_id: impl Into<String>, child_ids: Vec<String>) {
        self.auto_pop.add_affected_tree(effect_id, child_ids);
    }

    /// Advances the simulation by one tick.
    ///
    /// Any protocol violation aborts the tick and leaves the tick counter
    /// where it was.
    pub fn tick(&mut self) -> Result<TickResultContainer, RuntimeError> {
        let tick = self.current_tick;
        let mut container = TickResultContainer::new(tick);
        let mut covered_flows: HashSet<(FlowId, u32)> = HashSet::new();
        let mut covered_tasks: HashSet<TaskId> = HashSet::new();
        let mut rounds = 0;

        loop {
            let pending_tasks: Vec<TaskId> = self
                .tasks
                .task_ids()
                .into_iter()
                .filter(|id| !covered_tasks.contains(id))
                .collect();
            let has_pending_flows = self
                .flows
                .active_activations()
                .iter()
                .any(|key| !covered_flows.contains(key));
            if pending_tasks.is_empty() && !has_pending_flows {
                break;
            }

            rounds += 1;
            if rounds > self.config.max_rounds_per_tick {
                return Err(RuntimeError::TickBudgetExceeded { tick, rounds });
            }

            for task_id in pending_tasks {
                covered_tasks.insert(task_id);
                if let Some(recipe) = self.tasks.tick(task_id)? {
                    self.flows.create_flow(FlowParams::root(), &recipe, tick);
                }
            }

            let pending_flows: Vec<(FlowId, u32)> = self
                .flows
                .active_activations()
                .into_iter()
                .filter(|key| !covered_flows.contains(key))
                .collect();

            for (flow_id, activation) in pending_flows {
                covered_flows.insert((flow_id, activation));
                // An earlier flow this round may have cancelled, suspended or resumed it
                let current = self.flows.get(flow_id).map(|flow| flow.activation);
                if current != Some(activation) {
                    continue;
                }
                let results = self.process_stack(flow_id, tick)?;
                container.results.extend(results);
            }
        }

        debug!(
            "Tick {} finished after {} rounds with {} results",
            tick,
            rounds,
            container.results.len()
        );
        self.current_tick += 1;
        Ok(container)
    }

    /// Steps one flow until it sleeps, suspends or completes.
    fn process_stack(&mut self, flow_id: FlowId, tick: Tick) -> Result<Vec<TickResult>, RuntimeError> {
        let flow_name = self.flows.get_mut(flow_id)?.name.clone();
        let mut surfaced = Vec::new();
        let mut batch = self.resumption_responses(flow_id, tick)?;
        let mut steps = 0;

        loop {
            steps += 1;
            if steps > self.config.max_steps_per_flow {
                return Err(RuntimeError::StepBudgetExceeded { flow_id, steps });
            }

            let flow = self.flows.get_mut(flow_id)?;
            let first_step = flow.steps_taken == 0;
            let outcome = execute_stack(flow, &mut self.heap, tick)?;

            if first_step {
                let root = flow.stack.get_root()?;
                if let (Some(caller), Some(ResponseKind::Load { address, params })) =
                    (root.address.clone(), outcome.responses.first().map(|r| &r.kind))
                {
                    let edge = call_edge(caller, address.clone(), params.clone(), root.is_dependency);
                    batch.push(TickResponse::new(edge, tick));
                }
            }
            batch.extend(outcome.responses);

            if !batch.is_empty() {
                let responses = std::mem::take(&mut batch);
                let result = TickResult::Yielded {
                    flow_id,
                    flow_name: flow_name.clone(),
                    responses,
                };
                if self.should_recurse(result.responses())? {
                    self.auto_pop.add_to_tick_result_store(tick, result);
                } else {
                    surfaced.push(result);
                }
            }

            match outcome.boundary {
                Boundary::Continue => continue,
                Boundary::Halt => break,
                Boundary::Await { request, caller } => {
                    validate_await_shape(flow_id, request.strategy, request.dependencies.len())?;
                    let params = FlowParams::spawned_by(caller.clone(), request.is_dependency);
                    let await_dependencies = request
                        .dependencies
                        .iter()
                        .map(|recipe| self.flows.create_flow(params.clone(), recipe, tick))
                        .collect();

                    let instruction = AwaitFlowInstruction {
                        flow_id,
                        strategy: request.strategy,
                        caller,
                        is_dependency: request.is_dependency,
                        await_dependencies,
                        submitted_at: tick,
                    };
                    // The dependencies were created above and have not run, and every
                    // other waiter was settled when its last dependency completed, so a
                    // suspension from the tick loop never resolves a RACE.
                    let cancelled = self.flows.suspend_flow(instruction, tick)?;
                    debug_assert!(
                        cancelled.is_empty(),
                        "suspending flow {} cancelled {:?}",
                        flow_id,
                        cancelled
                    );
                    break;
                }
                Boundary::Complete {
                    return_value,
                    last_address,
                } => {
                    let cancelled = self.flows.mark_flow_complete(
                        flow_id,
                        return_value.clone(),
                        last_address,
                        tick,
                    )?;
                    surfaced.push(TickResult::Constructed {
                        flow_id,
                        flow_name,
                        return_value,
                        cancelled,
                    });
                    break;
                }
            }
        }

        Ok(surfaced)
    }

    /// Setup edges for a flow resumed from an await: one RESOLVE_DEPENDENCY
    /// per released dependency, drawn into the awaiting frame.
    fn resumption_responses(&mut self, flow_id: FlowId, tick: Tick) -> Result<Vec<TickResponse>, RuntimeError> {
        let flow = self.flows.get_mut(flow_id)?;
        let Some(resumption) = flow.resumption.take() else {
            return Ok(Vec::new());
        };

        let primed = flow
            .stack
            .peek(0)?
            .operations
            .iter()
            .any(|op| matches!(op, StackOperation::ProvideGivenParams(_)));
        if !primed {
            return Err(RuntimeError::ResumeWithoutSuspension { flow_id });
        }
        if !resumption.is_dependency {
            return Ok(Vec::new());
        }

        let caller = resumption.caller;
        Ok(resumption
            .resolved
            .into_iter()
            .filter_map(|dependency| {
                dependency.last_address.map(|from| {
                    TickResponse::new(
                        ResponseKind::ResolveDependency {
                            from,
                            to: caller.clone(),
                            value: dependency.value,
                        },
                        tick,
                    )
                })
            })
            .collect())
    }

    /// True when every address touched by `responses` belongs to one and
    /// the same collapsed effect.
    ///
    /// Addresses are translated through the heap; an untranslatable
    /// address is a page fault.
    pub fn should_recurse(&self, responses: &[TickResponse]) -> Result<bool, RuntimeError> {
        if !self.auto_pop.has_effects() || responses.is_empty() {
            return Ok(false);
        }

        let mut shared: Option<&str> = None;
        for address in responses.iter().flat_map(|r| r.kind.addresses()) {
            let node = self.heap.translate_address(address)?;
            let Some(effect) = self.auto_pop.get_entity_affected_by(node) else {
                return Ok(false);
            };
            match shared {
                Some(seen) if seen != effect => return Ok(false),
                _ => shared = Some(effect),
            }
        }
        Ok(shared.is_some())
    }

    /// Console snapshot of every flow and task.
    pub fn entities(&self) -> Entities {
        Entities {
            tick: self.current_tick,
            active: self.flows.active_summaries(),
            suspended: self.flows.suspended_summaries(),
            completed: self.flows.completed_flows(),
            cancelled: self.flows.cancelled_flows(),
            scheduled_tasks: self.tasks.list(),
            completed_tasks: self.tasks.completed(),
        }
    }

    /// Buffered effect-internal results, oldest first.
    pub fn flush_auto_pop_results(&mut self) -> Vec<TickResultContainer> {
        self.auto_pop.flush_all_stored_tick_results()
    }

    /// No live flows and nothing scheduled.
    pub fn is_idle(&self) -> bool {
        !self.flows.has_live_flows() && self.tasks.is_empty()
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn flows(&self) -> &FlowManager {
        &self.flows
    }

    /// Discards all session state: heap, effects, flows, tasks and the clock.
    pub fn reset(&mut self) {
        info!("Resetting runtime");
        self.heap.reset();
        self.auto_pop.reset();
        self.reset_managers();
    }

    /// Discards flows, tasks and buffered results but keeps heap objects
    /// and registered effects, so the same bundle can be replayed.
    pub fn reset_stacks(&mut self) {
        info!("Resetting flow stacks");
        self.auto_pop.clear_store();
        self.reset_managers();
    }

    fn reset_managers(&mut self) {
        self.flows = FlowManager::new();
        self.tasks = ScheduledTaskManager::new();
        self.current_tick = 0;
    }
}
