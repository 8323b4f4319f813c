//! Flow Lifecycle Management
//!
//! A flow is one logical unit of simulated work: a coroutine plus its own
//! execution stack. Every flow lives in exactly one of four sets:
//!
//! - active: steppable this tick
//! - suspended: parked on an [`AwaitFlowInstruction`]
//! - completed: finished with a return value (terminal)
//! - cancelled: torn down because it lost a RACE (terminal)
//!
//! Suspension and completion both re-run await resolution over every
//! pending instruction, since completing one flow can release several
//! waiters at once.

use std::collections::{BTreeMap, HashSet, VecDeque};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::protocol::{AwaitStrategy, Coroutine, CoroutineState, FlowRecipe, Resume};
use super::stack::{ExecutionStack, ExecutionStackRecord, StackOperation};
use super::{FlowId, Tick};
use crate::error::RuntimeError;
use crate::memory::Address;

/// How a new flow relates to whoever spawned it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowParams {
    /// Frame address of the spawning method, if any
    pub caller: Option<Address>,
    /// Whether the spawner consumes the flow's return value
    pub is_dependency: bool,
}

impl FlowParams {
    /// Parameters for a flow started by the outside world.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn spawned_by(caller: Address, is_dependency: bool) -> Self {
        Self {
            caller: Some(caller),
            is_dependency,
        }
    }
}

/// Describes one suspension.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AwaitFlowInstruction {
    pub flow_id: FlowId,
    pub strategy: AwaitStrategy,
    /// Frame address of the awaiting method
    pub caller: Address,
    pub is_dependency: bool,
    /// Awaited flows, in await order
    pub await_dependencies: Vec<FlowId>,
    pub submitted_at: Tick,
}

/// Checks the dependency count against the strategy.
pub fn validate_await_shape(
    flow_id: FlowId,
    strategy: AwaitStrategy,
    dependency_count: usize,
) -> Result<(), RuntimeError> {
    let reason = match strategy {
        AwaitStrategy::Single if dependency_count != 1 => {
            format!("SINGLE awaits exactly one flow, got {}", dependency_count)
        }
        AwaitStrategy::Race if dependency_count == 0 => "RACE needs at least one flow".to_string(),
        _ => return Ok(()),
    };
    Err(RuntimeError::InvalidAwait { flow_id, reason })
}

/// A dependency that released a waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDependency {
    pub flow_id: FlowId,
    pub last_address: Option<Address>,
    pub value: Value,
}

/// Why and when a suspended flow was moved back to active.
#[derive(Debug, Clone, PartialEq)]
pub struct Resumption {
    pub at: Tick,
    pub caller: Address,
    pub is_dependency: bool,
    pub resolved: Vec<ResolvedDependency>,
}

/// A live flow.
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub spawned_at: Tick,
    pub stack: ExecutionStack,
    coroutine: Box<dyn Coroutine>,
    /// Bumped on every resumption so a flow can run again in the tick it resumed
    pub activation: u32,
    pub steps_taken: u64,
    pub resumption: Option<Resumption>,
}

impl Flow {
    /// Steps the coroutine once.
    pub fn resume(&mut self, input: Resume) -> Result<CoroutineState, RuntimeError> {
        self.steps_taken += 1;
        self.coroutine
            .resume(input)
            .map_err(|message| RuntimeError::Coroutine {
                flow_id: self.id,
                message,
            })
    }

    /// Address of the innermost loaded method.
    pub fn current_address(&self) -> Option<Address> {
        self.stack
            .peek(0)
            .ok()
            .filter(|record| record.is_frame())
            .and_then(|record| record.address.clone())
    }

    fn summary(&self) -> FlowSummary {
        FlowSummary {
            id: self.id,
            name: self.name.clone(),
            spawned_at: self.spawned_at,
            depth: self.stack.open_frames().len(),
            current: self.current_address(),
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("spawned_at", &self.spawned_at)
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub id: FlowId,
    pub name: String,
    pub spawned_at: Tick,
    /// Number of loaded frames
    pub depth: usize,
    pub current: Option<Address>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SuspendedSummary {
    #[serde(flatten)]
    pub flow: FlowSummary,
    pub instruction: AwaitFlowInstruction,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompletedFlow {
    pub id: FlowId,
    pub name: String,
    pub return_value: Value,
    pub last_address: Option<Address>,
    pub spawned_at: Tick,
    pub completed_at: Tick,
    /// Position in global completion order
    pub completion_order: u64,
}

/// Record of a torn-down flow, with enough context for the UI to clean up.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CancelledFlow {
    pub id: FlowId,
    pub name: String,
    /// Flow whose RACE resolution caused the cancellation
    pub parent_flow: FlowId,
    /// Awaiting frame of the parent flow
    pub caller: Option<Address>,
    /// Original spawner of this flow, from the bottom of its stack
    pub root_caller: Option<Address>,
    pub open_frames: Vec<Address>,
    pub spawned_at: Tick,
    pub cancelled_at: Tick,
}

/// Flow ids per lifecycle set.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct FlowListing {
    pub active: Vec<FlowId>,
    pub suspended: Vec<FlowId>,
    pub completed: Vec<FlowId>,
    pub cancelled: Vec<FlowId>,
}

/// Exclusive owner of flows and await instructions.
#[derive(Debug, Default)]
pub struct FlowManager {
    next_id: FlowId,
    completion_counter: u64,
    active: BTreeMap<FlowId, Flow>,
    suspended: BTreeMap<FlowId, Flow>,
    completed: BTreeMap<FlowId, CompletedFlow>,
    cancelled: BTreeMap<FlowId, CancelledFlow>,
    /// Await graph: suspended flow → what it waits on
    await_instructions: BTreeMap<FlowId, AwaitFlowInstruction>,
}

impl FlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an active flow for the recipe and returns its id.
    pub fn create_flow(&mut self, params: FlowParams, recipe: &FlowRecipe, spawned_at: Tick) -> FlowId {
        self.next_id += 1;
        let id = self.next_id;

        let mut stack = ExecutionStack::new(id);
        stack.push(ExecutionStackRecord::entry(
            params.caller,
            recipe.args.clone(),
            params.is_dependency,
        ));

        debug!("Created flow {} '{}' at tick {}", id, recipe.name, spawned_at);
        self.active.insert(
            id,
            Flow {
                id,
                name: recipe.name.clone(),
                spawned_at,
                stack,
                coroutine: recipe.instantiate(),
                activation: 0,
                steps_taken: 0,
                resumption: None,
            },
        );
        id
    }

    /// Parks an active flow on `instruction` and re-runs await resolution.
    ///
    /// Returns every flow cancelled by RACE resolutions this triggered.
    pub fn suspend_flow(
        &mut self,
        instruction: AwaitFlowInstruction,
        tick: Tick,
    ) -> Result<Vec<CancelledFlow>, RuntimeError> {
        let flow_id = instruction.flow_id;
        if self.suspended.contains_key(&flow_id) {
            return Err(RuntimeError::AlreadySuspended { flow_id });
        }
        validate_await_shape(flow_id, instruction.strategy, instruction.await_dependencies.len())?;
        let flow = self
            .active
            .remove(&flow_id)
            .ok_or(RuntimeError::NotActive { flow_id })?;

        info!(
            "Flow {} suspended ({} on {:?})",
            flow_id, instruction.strategy, instruction.await_dependencies
        );
        for dependency in &instruction.await_dependencies {
            if self.cancelled.contains_key(dependency) {
                warn!(
                    "Flow {} awaits cancelled flow {}; it will never resolve through it",
                    flow_id, dependency
                );
            }
        }
        self.suspended.insert(flow_id, flow);
        self.await_instructions.insert(flow_id, instruction);
        self.resolve_awaits(tick)
    }

    /// Moves an active flow to completed and re-runs await resolution.
    pub fn mark_flow_complete(
        &mut self,
        flow_id: FlowId,
        return_value: Value,
        last_address: Option<Address>,
        completed_at: Tick,
    ) -> Result<Vec<CancelledFlow>, RuntimeError> {
        let flow = self
            .active
            .remove(&flow_id)
            .ok_or(RuntimeError::NotActive { flow_id })?;

        self.completion_counter += 1;
        info!("Flow {} '{}' completed at tick {}", flow_id, flow.name, completed_at);
        self.completed.insert(
            flow_id,
            CompletedFlow {
                id: flow_id,
                name: flow.name,
                return_value,
                last_address,
                spawned_at: flow.spawned_at,
                completed_at,
                completion_order: self.completion_counter,
            },
        );
        self.resolve_awaits(completed_at)
    }

    /// Cancels a live flow together with everything it transitively awaits.
    ///
    /// The whole subtree is collected before anything is removed.
    pub fn cancel_flow(
        &mut self,
        flow_id: FlowId,
        parent_flow: FlowId,
        caller: Option<Address>,
        tick: Tick,
    ) -> Result<Vec<CancelledFlow>, RuntimeError> {
        if !self.is_alive(flow_id) {
            return Err(RuntimeError::CancelNotAlive { flow_id });
        }

        let mut doomed = vec![flow_id];
        doomed.extend(self.find_all_alive_child_flows(flow_id));

        let mut cancelled = Vec::with_capacity(doomed.len());
        for id in doomed {
            let Some(flow) = self.active.remove(&id).or_else(|| self.suspended.remove(&id)) else {
                continue;
            };
            self.await_instructions.remove(&id);

            let record = CancelledFlow {
                id,
                name: flow.name.clone(),
                parent_flow,
                caller: caller.clone(),
                root_caller: flow.stack.get_root().ok().and_then(|r| r.address.clone()),
                open_frames: flow.stack.open_frames(),
                spawned_at: flow.spawned_at,
                cancelled_at: tick,
            };
            info!("Flow {} '{}' cancelled by flow {}", id, flow.name, parent_flow);
            self.cancelled.insert(id, record.clone());
            cancelled.push(record);
        }
        Ok(cancelled)
    }

    /// Every active or suspended flow reachable from `flow_id` through the
    /// await graph, in breadth-first order, excluding `flow_id` itself.
    pub fn find_all_alive_child_flows(&self, flow_id: FlowId) -> Vec<FlowId> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([flow_id]);
        let mut queue = VecDeque::from([flow_id]);

        while let Some(id) = queue.pop_front() {
            let Some(instruction) = self.await_instructions.get(&id) else {
                continue;
            };
            for &dependency in &instruction.await_dependencies {
                if self.is_alive(dependency) && seen.insert(dependency) {
                    found.push(dependency);
                    queue.push_back(dependency);
                }
            }
        }
        found
    }

    /// Resumes every suspended flow whose instruction is now satisfied.
    fn resolve_awaits(&mut self, tick: Tick) -> Result<Vec<CancelledFlow>, RuntimeError> {
        let waiting: Vec<FlowId> = self.await_instructions.keys().copied().collect();
        let mut cancelled = Vec::new();

        for flow_id in waiting {
            let Some(instruction) = self.await_instructions.get(&flow_id) else {
                // Torn down by a RACE resolved earlier in this pass
                continue;
            };
            let Some((value, resolved)) = self.evaluate(instruction) else {
                continue;
            };
            let Some(instruction) = self.await_instructions.remove(&flow_id) else {
                continue;
            };

            if instruction.strategy == AwaitStrategy::Race {
                let winner = resolved.first().map(|d| d.flow_id);
                for &loser in &instruction.await_dependencies {
                    if Some(loser) != winner && self.is_alive(loser) {
                        cancelled.extend(self.cancel_flow(
                            loser,
                            flow_id,
                            Some(instruction.caller.clone()),
                            tick,
                        )?);
                    }
                }
            }

            self.resume_flow(&instruction, value, resolved, tick)?;
        }
        Ok(cancelled)
    }

    /// Value and releasing dependencies if `instruction` is satisfied.
    fn evaluate(&self, instruction: &AwaitFlowInstruction) -> Option<(Value, Vec<ResolvedDependency>)> {
        let resolved = |id: FlowId| {
            self.completed.get(&id).map(|done| ResolvedDependency {
                flow_id: id,
                last_address: done.last_address.clone(),
                value: done.return_value.clone(),
            })
        };

        match instruction.strategy {
            AwaitStrategy::Single => {
                let dependency = resolved(*instruction.await_dependencies.first()?)?;
                Some((dependency.value.clone(), vec![dependency]))
            }
            AwaitStrategy::WaitForAll => {
                let all = instruction
                    .await_dependencies
                    .iter()
                    .map(|&id| resolved(id))
                    .collect::<Option<Vec<_>>>()?;
                let values = all.iter().map(|d| d.value.clone()).collect();
                Some((Value::Array(values), all))
            }
            AwaitStrategy::Race => {
                let winner = instruction
                    .await_dependencies
                    .iter()
                    .filter_map(|id| self.completed.get(id))
                    .min_by_key(|done| done.completion_order)?;
                let dependency = resolved(winner.id)?;
                Some((dependency.value.clone(), vec![dependency]))
            }
        }
    }

    fn resume_flow(
        &mut self,
        instruction: &AwaitFlowInstruction,
        value: Value,
        resolved: Vec<ResolvedDependency>,
        tick: Tick,
    ) -> Result<(), RuntimeError> {
        let flow_id = instruction.flow_id;
        let mut flow = self
            .suspended
            .remove(&flow_id)
            .ok_or(RuntimeError::ResumeWithoutSuspension { flow_id })?;

        flow.stack
            .peek_mut(0)?
            .operations
            .push_back(StackOperation::ProvideGivenParams(value));
        flow.activation += 1;
        flow.resumption = Some(Resumption {
            at: tick,
            caller: instruction.caller.clone(),
            is_dependency: instruction.is_dependency,
            resolved,
        });

        info!("Flow {} resumed at tick {}", flow_id, tick);
        self.active.insert(flow_id, flow);
        Ok(())
    }

    pub fn is_active(&self, flow_id: FlowId) -> bool {
        self.active.contains_key(&flow_id)
    }

    pub fn is_suspended(&self, flow_id: FlowId) -> bool {
        self.suspended.contains_key(&flow_id)
    }

    pub fn is_cancelled(&self, flow_id: FlowId) -> bool {
        self.cancelled.contains_key(&flow_id)
    }

    pub fn is_complete(&self, flow_id: FlowId) -> bool {
        self.completed.contains_key(&flow_id)
    }

    fn is_alive(&self, flow_id: FlowId) -> bool {
        self.is_active(flow_id) || self.is_suspended(flow_id)
    }

    pub fn list(&self) -> FlowListing {
        FlowListing {
            active: self.active.keys().copied().collect(),
            suspended: self.suspended.keys().copied().collect(),
            completed: self.completed.keys().copied().collect(),
            cancelled: self.cancelled.keys().copied().collect(),
        }
    }

    /// Active flow by id.
    pub fn get(&self, flow_id: FlowId) -> Option<&Flow> {
        self.active.get(&flow_id)
    }

    pub fn get_mut(&mut self, flow_id: FlowId) -> Result<&mut Flow, RuntimeError> {
        self.active
            .get_mut(&flow_id)
            .ok_or(RuntimeError::NotActive { flow_id })
    }

    pub fn get_suspended(&self, flow_id: FlowId) -> Option<&Flow> {
        self.suspended.get(&flow_id)
    }

    pub fn get_completed(&self, flow_id: FlowId) -> Option<&CompletedFlow> {
        self.completed.get(&flow_id)
    }

    pub fn get_cancelled(&self, flow_id: FlowId) -> Option<&CancelledFlow> {
        self.cancelled.get(&flow_id)
    }

    pub fn await_instruction(&self, flow_id: FlowId) -> Option<&AwaitFlowInstruction> {
        self.await_instructions.get(&flow_id)
    }

    /// Active flows with their activation counters, in registration order.
    pub fn active_activations(&self) -> Vec<(FlowId, u32)> {
        self.active.values().map(|f| (f.id, f.activation)).collect()
    }

    pub fn has_live_flows(&self) -> bool {
        !self.active.is_empty() || !self.suspended.is_empty()
    }

    pub fn active_summaries(&self) -> Vec<FlowSummary> {
        self.active.values().map(Flow::summary).collect()
    }

    pub fn suspended_summaries(&self) -> Vec<SuspendedSummary> {
        self.suspended
            .values()
            .filter_map(|flow| {
                self.await_instructions.get(&flow.id).map(|instruction| SuspendedSummary {
                    flow: flow.summary(),
                    instruction: instruction.clone(),
                })
            })
            .collect()
    }

    pub fn completed_flows(&self) -> Vec<CompletedFlow> {
        self.completed.values().cloned().collect()
    }

    pub fn cancelled_flows(&self) -> Vec<CancelledFlow> {
        self.cancelled.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::{idle_recipe, ScriptedCoroutine};
    use serde_json::json;

    fn caller() -> Address {
        Address::new("api_1", 0)
    }

    fn instruction(flow_id: FlowId, strategy: AwaitStrategy, deps: Vec<FlowId>) -> AwaitFlowInstruction {
        AwaitFlowInstruction {
            flow_id,
            strategy,
            caller: caller(),
            is_dependency: true,
            await_dependencies: deps,
            submitted_at: 0,
        }
    }

    fn spawn(manager: &mut FlowManager, name: &str) -> FlowId {
        manager.create_flow(FlowParams::root(), &idle_recipe(name), 0)
    }

    /// Loads a frame so resumption has a top frame to push onto.
    fn load_frame(manager: &mut FlowManager, flow_id: FlowId) {
        let flow = manager.get_mut(flow_id).unwrap();
        flow.stack
            .push(ExecutionStackRecord::frame(caller(), vec![], false));
    }

    #[test]
    fn test_create_flow_assigns_monotonic_ids() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");

        assert_eq!((a, b), (1, 2));
        assert!(manager.is_active(a));
        assert_eq!(manager.get(a).unwrap().stack.len(), 1);
        assert_eq!(manager.list().active, vec![1, 2]);
    }

    #[test]
    fn test_create_flow_binds_recipe_args() {
        let mut manager = FlowManager::new();
        let recipe = FlowRecipe::from_fn("q", vec![json!(5)], || {
            Box::new(ScriptedCoroutine::new(vec![]))
        });
        let params = FlowParams::spawned_by(caller(), true);
        let id = manager.create_flow(params, &recipe, 3);

        let flow = manager.get(id).unwrap();
        let root = flow.stack.get_root().unwrap();
        assert_eq!(root.params, vec![json!(5)]);
        assert_eq!(root.address, Some(caller()));
        assert!(root.is_dependency);
        assert_eq!(flow.spawned_at, 3);
    }

    #[test]
    fn test_suspend_requires_active() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");

        manager
            .suspend_flow(instruction(a, AwaitStrategy::Single, vec![b]), 0)
            .unwrap();
        assert!(manager.is_suspended(a));

        assert_eq!(
            manager.suspend_flow(instruction(a, AwaitStrategy::Single, vec![b]), 0),
            Err(RuntimeError::AlreadySuspended { flow_id: a })
        );
        assert_eq!(
            manager.suspend_flow(instruction(99, AwaitStrategy::Single, vec![b]), 0),
            Err(RuntimeError::NotActive { flow_id: 99 })
        );
    }

    #[test]
    fn test_single_resolves_with_return_value() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        load_frame(&mut manager, a);

        manager
            .suspend_flow(instruction(a, AwaitStrategy::Single, vec![b]), 0)
            .unwrap();
        assert!(manager.is_suspended(a));

        manager.mark_flow_complete(b, json!("rows"), None, 2).unwrap();

        assert!(manager.is_active(a));
        let flow = manager.get(a).unwrap();
        assert_eq!(
            flow.stack.peek(0).unwrap().operations.back(),
            Some(&StackOperation::ProvideGivenParams(json!("rows")))
        );
        assert_eq!(flow.activation, 1);
        assert_eq!(flow.resumption.as_ref().unwrap().at, 2);
    }

    #[test]
    fn test_wait_for_all_keeps_await_order() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        let c = spawn(&mut manager, "c");
        load_frame(&mut manager, a);

        manager
            .suspend_flow(instruction(a, AwaitStrategy::WaitForAll, vec![b, c]), 0)
            .unwrap();

        manager.mark_flow_complete(c, json!("C"), None, 1).unwrap();
        assert!(manager.is_suspended(a));

        manager.mark_flow_complete(b, json!("B"), None, 2).unwrap();
        let top = manager.get(a).unwrap().stack.peek(0).unwrap();
        assert_eq!(
            top.operations.back(),
            Some(&StackOperation::ProvideGivenParams(json!(["B", "C"])))
        );
    }

    #[test]
    fn test_wait_for_all_empty_resolves_on_suspend() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        load_frame(&mut manager, a);

        manager
            .suspend_flow(instruction(a, AwaitStrategy::WaitForAll, vec![]), 0)
            .unwrap();
        assert!(manager.is_active(a));
    }

    #[test]
    fn test_race_cancels_loser_subtree() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        let c = spawn(&mut manager, "c");
        let d = spawn(&mut manager, "d");
        load_frame(&mut manager, a);
        load_frame(&mut manager, c);

        manager
            .suspend_flow(instruction(c, AwaitStrategy::Single, vec![d]), 0)
            .unwrap();
        manager
            .suspend_flow(instruction(a, AwaitStrategy::Race, vec![b, c]), 0)
            .unwrap();

        let cancelled = manager.mark_flow_complete(b, json!("fast"), None, 1).unwrap();

        let ids: Vec<FlowId> = cancelled.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c, d]);
        for id in [c, d] {
            assert!(manager.is_cancelled(id));
            assert!(!manager.is_active(id));
            assert!(!manager.is_suspended(id));
            assert_eq!(manager.get_cancelled(id).unwrap().parent_flow, a);
        }
        assert!(manager.await_instruction(c).is_none());
        assert!(manager.is_active(a));
        assert_eq!(
            manager.get(a).unwrap().stack.peek(0).unwrap().operations.back(),
            Some(&StackOperation::ProvideGivenParams(json!("fast")))
        );
    }

    #[test]
    fn test_suspend_on_fresh_flows_cancels_nothing() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        let c = spawn(&mut manager, "c");
        let d = spawn(&mut manager, "d");
        load_frame(&mut manager, a);
        load_frame(&mut manager, c);

        manager
            .suspend_flow(instruction(a, AwaitStrategy::Race, vec![b]), 0)
            .unwrap();
        let cancelled = manager
            .suspend_flow(instruction(c, AwaitStrategy::Race, vec![d]), 0)
            .unwrap();

        assert!(cancelled.is_empty());
        assert!(manager.is_suspended(a));
        assert!(manager.is_suspended(c));
    }

    #[test]
    fn test_race_picks_earliest_completion() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        let c = spawn(&mut manager, "c");
        load_frame(&mut manager, a);

        manager.mark_flow_complete(c, json!("c"), None, 0).unwrap();
        manager.mark_flow_complete(b, json!("b"), None, 0).unwrap();
        manager
            .suspend_flow(instruction(a, AwaitStrategy::Race, vec![b, c]), 0)
            .unwrap();

        let resumption = manager.get(a).unwrap().resumption.clone().unwrap();
        assert_eq!(resumption.resolved[0].flow_id, c);
    }

    #[test]
    fn test_cancel_requires_alive_flow() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        manager.mark_flow_complete(a, json!(null), None, 0).unwrap();

        assert_eq!(
            manager.cancel_flow(a, 0, None, 0),
            Err(RuntimeError::CancelNotAlive { flow_id: a })
        );
    }

    #[test]
    fn test_cancel_records_root_caller() {
        let mut manager = FlowManager::new();
        let recipe = idle_recipe("child");
        let id = manager.create_flow(FlowParams::spawned_by(caller(), false), &recipe, 0);

        let cancelled = manager.cancel_flow(id, 42, Some(caller()), 5).unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].root_caller, Some(caller()));
        assert_eq!(cancelled[0].parent_flow, 42);
        assert_eq!(cancelled[0].cancelled_at, 5);
    }

    #[test]
    fn test_find_all_alive_child_flows_skips_finished() {
        let mut manager = FlowManager::new();
        let a = spawn(&mut manager, "a");
        let b = spawn(&mut manager, "b");
        let c = spawn(&mut manager, "c");

        manager
            .suspend_flow(instruction(a, AwaitStrategy::WaitForAll, vec![b, c]), 0)
            .unwrap();
        manager.mark_flow_complete(b, json!(1), None, 0).unwrap();

        assert_eq!(manager.find_all_alive_child_flows(a), vec![c]);
    }

    #[test]
    fn test_invalid_await_shapes() {
        assert!(validate_await_shape(1, AwaitStrategy::Single, 1).is_ok());
        assert!(validate_await_shape(1, AwaitStrategy::Single, 2).is_err());
        assert!(validate_await_shape(1, AwaitStrategy::Race, 0).is_err());
        assert!(validate_await_shape(1, AwaitStrategy::WaitForAll, 0).is_ok());
    }

    #[test]
    fn test_mark_complete_requires_active() {
        let mut manager = FlowManager::new();
        assert_eq!(
            manager.mark_flow_complete(5, json!(null), None, 0),
            Err(RuntimeError::NotActive { flow_id: 5 })
        );
    }
}
