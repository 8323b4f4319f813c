//! Scripted Methods
//!
//! Turns a scenario's method bodies into coroutines speaking the
//! instrumented-method protocol, and installs a scenario into a runtime.
//!
//! A [`ScriptCoroutine`] interprets one flow. Nested `call`s run inside the
//! same coroutine with their own LOAD/UNLOAD pair; `await`s hand their calls
//! to the runtime as separate flows.

use std::rc::Rc;

use log::{debug, info};
use serde_json::{Map, Value};

use super::model::{substitute, CallDef, Instruction, MethodDef, Scenario};
use super::validator::{resolve_call, ValidationError};
use crate::execution::{
    AwaitRequest, Command, CommandKind, Coroutine, CoroutineState, FlowId, FlowRecipe, Resume,
    Runtime, TaskId,
};
use crate::memory::{Address, ObjectInstance};

/// A service as installed on the heap.
#[derive(Debug)]
struct ServiceImage {
    name: String,
    address: String,
    fields: Map<String, Value>,
    methods: Vec<MethodDef>,
}

/// Every installed service, shared by all script coroutines of a bundle.
#[derive(Debug, Default)]
pub struct Program {
    services: Vec<ServiceImage>,
}

/// Index of a method inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef {
    service: usize,
    method: usize,
}

impl Program {
    fn resolve(&self, service: &str, method: &str) -> Option<MethodRef> {
        let s = self.services.iter().position(|s| s.name == service)?;
        let m = self.services[s]
            .methods
            .iter()
            .position(|m| m.name == method)?;
        Some(MethodRef {
            service: s,
            method: m,
        })
    }

    fn method(&self, target: MethodRef) -> &MethodDef {
        &self.services[target.service].methods[target.method]
    }

    /// Starting address of a method: the owning object plus the method offset.
    pub fn address(&self, target: MethodRef) -> Address {
        Address::new(
            self.services[target.service].address.clone(),
            target.method as u32,
        )
    }

    pub fn node_id(&self, target: MethodRef) -> String {
        format!(
            "{}.{}",
            self.services[target.service].name,
            self.method(target).name
        )
    }

    /// Recipe for a flow running `target(args)`.
    pub fn recipe(self: &Rc<Self>, target: MethodRef, args: Vec<Value>) -> FlowRecipe {
        let program = Rc::clone(self);
        FlowRecipe::from_fn(self.node_id(target), args, move || {
            Box::new(ScriptCoroutine::new(Rc::clone(&program), target))
        })
    }

    fn recipe_for_call(self: &Rc<Self>, call: &CallDef, args: Vec<Value>) -> Result<FlowRecipe, String> {
        let target = self
            .resolve(&call.service, &call.method)
            .ok_or_else(|| format!("unknown method '{}'", call.node_id()))?;
        Ok(self.recipe(target, args))
    }

    /// Locals of a fresh activation: service fields overlaid with params.
    fn locals(&self, target: MethodRef, args: &[Value]) -> Map<String, Value> {
        let mut locals = self.services[target.service].fields.clone();
        for (i, param) in self.method(target).params.iter().enumerate() {
            locals.insert(param.clone(), args.get(i).cloned().unwrap_or(Value::Null));
        }
        locals
    }
}

/// One method activation inside a script coroutine.
#[derive(Debug)]
struct ScriptFrame {
    target: MethodRef,
    address: Address,
    pc: usize,
    locals: Map<String, Value>,
    /// HALTs emitted so far for the current `sleep`
    slept: u32,
    /// Local receiving the value of the pending call or await
    pending_bind: Option<String>,
    unloaded: bool,
}

/// Interprets a scenario method body as an instrumented-method coroutine.
pub struct ScriptCoroutine {
    program: Rc<Program>,
    entry: MethodRef,
    frames: Vec<ScriptFrame>,
    started: bool,
}

impl ScriptCoroutine {
    pub fn new(program: Rc<Program>, entry: MethodRef) -> Self {
        Self {
            program,
            entry,
            frames: Vec::new(),
            started: false,
        }
    }

    /// Pushes an activation and returns its LOAD.
    fn enter(&mut self, target: MethodRef, args: Vec<Value>, is_dependency: bool) -> CoroutineState {
        let address = self.program.address(target);
        self.frames.push(ScriptFrame {
            target,
            address: address.clone(),
            pc: 0,
            locals: self.program.locals(target, &args),
            slept: 0,
            pending_bind: None,
            unloaded: false,
        });
        yielded(
            address,
            CommandKind::Load {
                params: args,
                is_dependency,
            },
        )
    }

    /// Hands a call or await result to the innermost frame.
    fn deliver(&mut self, value: Value) -> Result<(), String> {
        let frame = self
            .frames
            .last_mut()
            .ok_or("value delivered with no method loaded")?;
        if let Some(name) = frame.pending_bind.take() {
            frame.locals.insert(name, value);
        }
        Ok(())
    }

    /// Runs the innermost frame up to its next command.
    fn advance(&mut self) -> Result<CoroutineState, String> {
        let program = Rc::clone(&self.program);
        let frame = self.frames.last_mut().ok_or("no method loaded")?;
        if frame.unloaded {
            return Err(format!("{} stepped again after UNLOAD", frame.address));
        }
        let address = frame.address.clone();

        loop {
            let body = &program.method(frame.target).body;
            let Some(instruction) = body.get(frame.pc) else {
                frame.unloaded = true;
                return Ok(yielded(
                    address,
                    CommandKind::Unload {
                        return_value: Value::Null,
                    },
                ));
            };

            match instruction {
                Instruction::Log(value) => {
                    frame.pc += 1;
                    let logs = match substitute(value, &frame.locals)? {
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    return Ok(yielded(address, CommandKind::Log { logs }));
                }
                Instruction::Sleep(0) => {
                    frame.pc += 1;
                }
                Instruction::Sleep(ticks) => {
                    frame.slept += 1;
                    let covered_halts = frame.slept;
                    if covered_halts >= *ticks {
                        frame.slept = 0;
                        frame.pc += 1;
                    }
                    return Ok(yielded(
                        address,
                        CommandKind::Halt {
                            covered_halts,
                            halted_for: *ticks,
                        },
                    ));
                }
                Instruction::Call(call) => {
                    frame.pc += 1;
                    frame.pending_bind = call.bind.clone();
                    let args = substitute_all(&call.args, &frame.locals)?;
                    let target = program
                        .resolve(&call.service, &call.method)
                        .ok_or_else(|| format!("unknown method '{}'", call.node_id()))?;
                    return Ok(self.enter(target, args, call.bind.is_some()));
                }
                Instruction::Await(await_def) => {
                    frame.pc += 1;
                    frame.pending_bind = await_def.bind.clone();
                    let dependencies = await_def
                        .calls
                        .iter()
                        .map(|call| {
                            let args = substitute_all(&call.args, &frame.locals)?;
                            program.recipe_for_call(call, args)
                        })
                        .collect::<Result<Vec<_>, String>>()?;
                    return Ok(yielded(
                        address,
                        CommandKind::AwaitFlow(AwaitRequest {
                            strategy: await_def.strategy,
                            is_dependency: await_def.bind.is_some(),
                            dependencies,
                        }),
                    ));
                }
                Instruction::Return(value) => {
                    frame.unloaded = true;
                    let return_value = substitute(value, &frame.locals)?;
                    return Ok(yielded(address, CommandKind::Unload { return_value }));
                }
            }
        }
    }
}

impl Coroutine for ScriptCoroutine {
    fn resume(&mut self, input: Resume) -> Result<CoroutineState, String> {
        match input {
            Resume::Params(args) => {
                if self.started {
                    return Err("entry parameters delivered twice".to_string());
                }
                self.started = true;
                // The spawner decides whether the entry call is a dependency
                return Ok(self.enter(self.entry, args, false));
            }
            Resume::Given(value) => self.deliver(value)?,
            Resume::ReturnValue(value) => {
                let finished = self
                    .frames
                    .pop()
                    .ok_or("return value delivered with no method loaded")?;
                if !finished.unloaded {
                    return Err(format!("{} popped before UNLOAD", finished.address));
                }
                if self.frames.is_empty() {
                    return Ok(CoroutineState::Complete(value));
                }
                self.deliver(value)?;
            }
            Resume::Continue => {}
        }
        self.advance()
    }
}

fn yielded(address: Address, kind: CommandKind) -> CoroutineState {
    CoroutineState::Yielded(Command { address, kind })
}

fn substitute_all(values: &[Value], locals: &Map<String, Value>) -> Result<Vec<Value>, String> {
    values.iter().map(|v| substitute(v, locals)).collect()
}

/// A scenario installed into a runtime.
#[derive(Debug)]
pub struct ScenarioBundle {
    program: Rc<Program>,
    pub entry_flows: Vec<FlowId>,
    pub tasks: Vec<TaskId>,
}

impl ScenarioBundle {
    /// Installs a validated scenario:
    /// 1. Registers one heap instance per service
    /// 2. Registers `Service.method` translations for every method address
    /// 3. Registers effects
    /// 4. Spawns entry flows and schedules timers and intervals
    pub fn install(scenario: &Scenario, runtime: &mut Runtime) -> Result<Self, ValidationError> {
        let mut program = Program::default();
        for service in &scenario.services {
            let mut instance = ObjectInstance::new(service.class_name());
            instance.fields = service.fields.clone();
            let address = runtime.register_instance(Box::new(instance));

            for (offset, method) in service.methods.iter().enumerate() {
                let method_address = Address::new(address.clone(), offset as u32);
                runtime
                    .heap_mut()
                    .set_address_translation(&method_address, format!("{}.{}", service.name, method.name));
            }
            debug!("Installed service '{}' at {}", service.name, address);

            program.services.push(ServiceImage {
                name: service.name.clone(),
                address,
                fields: service.fields.clone(),
                methods: service.methods.clone(),
            });
        }
        let program = Rc::new(program);

        for effect in &scenario.effects {
            runtime.add_auto_pop_effect(effect.id.clone(), effect.nodes.clone());
        }

        let mut bundle = Self {
            program,
            entry_flows: Vec::new(),
            tasks: Vec::new(),
        };

        for (i, call) in scenario.entry.iter().enumerate() {
            let recipe = bundle.recipe(scenario, call, &format!("Entry #{}", i + 1))?;
            bundle.entry_flows.push(runtime.spawn_flow(recipe));
        }
        for timer in &scenario.timers {
            let recipe = bundle.recipe(scenario, &timer.call, &format!("Timer '{}'", timer.name))?;
            bundle
                .tasks
                .push(runtime.schedule_timer(timer.name.clone(), timer.after, recipe));
        }
        for interval in &scenario.intervals {
            let recipe = bundle.recipe(
                scenario,
                &interval.call,
                &format!("Interval '{}'", interval.name),
            )?;
            bundle
                .tasks
                .push(runtime.schedule_interval(interval.name.clone(), interval.every, recipe));
        }

        info!(
            "Installed {} services, {} entry flows, {} scheduled tasks",
            scenario.services.len(),
            bundle.entry_flows.len(),
            bundle.tasks.len()
        );
        Ok(bundle)
    }

    /// Recipe for a top-level call; arguments are taken literally.
    fn recipe(&self, scenario: &Scenario, call: &CallDef, context: &str) -> Result<FlowRecipe, ValidationError> {
        resolve_call(scenario, call, context)?;
        let target = self
            .program
            .resolve(&call.service, &call.method)
            .ok_or_else(|| ValidationError::UnknownMethod {
                context: context.to_string(),
                service: call.service.clone(),
                method: call.method.clone(),
            })?;
        Ok(self.program.recipe(target, call.args.clone()))
    }

    /// Starting address of `Service.method`, if installed.
    pub fn address_of(&self, service: &str, method: &str) -> Option<Address> {
        self.program
            .resolve(service, method)
            .map(|target| self.program.address(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ResponseKind, TickResult, TickResultContainer};
    use crate::scenario::parse_scenario;
    use serde_json::json;

    fn install(yaml: &str) -> (Runtime, ScenarioBundle) {
        let scenario = parse_scenario(yaml).unwrap();
        let mut runtime = Runtime::new();
        let bundle = ScenarioBundle::install(&scenario, &mut runtime).unwrap();
        (runtime, bundle)
    }

    fn labels(container: &TickResultContainer) -> Vec<&'static str> {
        container.responses().map(|r| r.kind.label()).collect()
    }

    fn run_until_idle(runtime: &mut Runtime, max_ticks: usize) -> Vec<TickResultContainer> {
        let mut containers = Vec::new();
        for _ in 0..max_ticks {
            containers.push(runtime.tick().unwrap());
            if runtime.is_idle() {
                break;
            }
        }
        containers
    }

    const CHECKOUT: &str = r#"
services:
  - name: Api
    fields: { region: eu }
    methods:
      - name: handle
        params: [user]
        body:
          - log: [$region, $user]
          - call: { service: Db, method: query, args: [$user], bind: rows }
          - return: { user: $user, rows: $rows }
  - name: Db
    methods:
      - name: query
        params: [who]
        body:
          - return: [$who]
entry:
  - { service: Api, method: handle, args: [alice] }
"#;

    #[test]
    fn test_install_registers_services_and_translations() {
        let (runtime, bundle) = install(CHECKOUT);

        assert_eq!(runtime.heap().len(), 2);
        assert_eq!(bundle.entry_flows, vec![1]);
        let handle = bundle.address_of("Api", "handle").unwrap();
        assert_eq!(runtime.heap().translate_address(&handle).unwrap(), "Api.handle");
        let list = runtime.heap().list();
        assert_eq!(list[0].class_name, "Api");
        assert_eq!(list[0].fields, json!({"region": "eu"}));
    }

    #[test]
    fn test_nested_call_runs_in_one_tick() {
        let (mut runtime, bundle) = install(CHECKOUT);
        let container = runtime.tick().unwrap();

        assert_eq!(
            labels(&container),
            vec![
                "LOAD",
                "LOG",
                "CALL_DEPENDENCY",
                "LOAD",
                "UNLOAD",
                "RESOLVE_DEPENDENCY",
                "UNLOAD",
            ]
        );
        let handle = bundle.address_of("Api", "handle").unwrap();
        let log = container
            .responses()
            .find_map(|r| match &r.kind {
                ResponseKind::Log { address, logs } => Some((address.clone(), logs.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(log, (handle, vec![json!("eu"), json!("alice")]));

        match container.results.last().unwrap() {
            TickResult::Constructed { return_value, .. } => {
                assert_eq!(return_value, &json!({"user": "alice", "rows": ["alice"]}));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_sleep_halts_once_per_tick() {
        let (mut runtime, _) = install(
            r#"
services:
  - name: Job
    methods:
      - name: run
        body:
          - sleep: 2
          - return: done
entry:
  - { service: Job, method: run }
"#,
        );

        let containers = run_until_idle(&mut runtime, 10);
        assert_eq!(containers.len(), 3);
        assert_eq!(labels(&containers[0]), vec!["LOAD", "HALT"]);
        assert_eq!(labels(&containers[1]), vec!["HALT"]);
        assert_eq!(labels(&containers[2]), vec!["UNLOAD"]);
        assert_eq!(runtime.entities().completed[0].return_value, json!("done"));
    }

    #[test]
    fn test_await_race_binds_winner_and_cancels_loser() {
        let (mut runtime, _) = install(
            r#"
services:
  - name: Api
    methods:
      - name: fetch
        body:
          - await:
              strategy: race
              calls:
                - { service: Store, method: slow }
                - { service: Store, method: fast }
              bind: winner
          - return: $winner
  - name: Store
    methods:
      - name: slow
        body:
          - sleep: 5
          - return: slow
      - name: fast
        body:
          - sleep: 1
          - return: fast
entry:
  - { service: Api, method: fetch }
"#,
        );

        run_until_idle(&mut runtime, 20);
        let entities = runtime.entities();
        let fetch = entities.completed.iter().find(|f| f.name == "Api.fetch").unwrap();
        assert_eq!(fetch.return_value, json!("fast"));
        assert_eq!(entities.cancelled.len(), 1);
        assert_eq!(entities.cancelled[0].name, "Store.slow");
        assert_eq!(entities.cancelled[0].parent_flow, fetch.id);
    }

    #[test]
    fn test_await_wait_for_all_in_call_order() {
        let (mut runtime, _) = install(
            r#"
services:
  - name: Api
    methods:
      - name: gather
        body:
          - await:
              strategy: wait_for_all
              calls:
                - { service: Store, method: get, args: [3, a] }
                - { service: Store, method: get, args: [1, b] }
              bind: all
          - return: $all
  - name: Store
    methods:
      - name: get
        params: [delay, value]
        body:
          - sleep: 1
          - return: $value
entry:
  - { service: Api, method: gather }
"#,
        );

        run_until_idle(&mut runtime, 10);
        let gather = runtime
            .entities()
            .completed
            .into_iter()
            .find(|f| f.name == "Api.gather")
            .unwrap();
        assert_eq!(gather.return_value, json!(["a", "b"]));
    }

    #[test]
    fn test_interval_spawns_named_flows() {
        let (mut runtime, bundle) = install(
            r#"
services:
  - name: Api
    methods:
      - { name: ping, body: [{ return: pong }] }
intervals:
  - { name: beat, every: 1, call: { service: Api, method: ping } }
"#,
        );
        assert_eq!(bundle.tasks.len(), 1);

        for _ in 0..3 {
            runtime.tick().unwrap();
        }
        let names: Vec<String> = runtime.entities().completed.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["beat#1", "beat#2", "beat#3"]);
    }

    #[test]
    fn test_effect_buffers_internal_calls() {
        let (mut runtime, _) = install(
            r#"
services:
  - name: Api
    methods:
      - name: handle
        body:
          - call: { service: Db, method: query, bind: rows }
          - return: $rows
  - name: Db
    methods:
      - name: query
        body:
          - call: { service: Db, method: index, bind: ids }
          - return: $ids
      - name: index
        body:
          - return: [1, 2]
entry:
  - { service: Api, method: handle }
effects:
  - { id: storage, nodes: [Db.query, Db.index] }
"#,
        );

        let container = runtime.tick().unwrap();
        let buffered = runtime.flush_auto_pop_results();

        assert_eq!(buffered.len(), 1);
        assert!(buffered[0].responses().all(|r| r.is_auto_pop));
        assert_eq!(
            labels(&buffered[0]),
            vec!["CALL_DEPENDENCY", "LOAD", "UNLOAD", "RESOLVE_DEPENDENCY"]
        );
        assert!(labels(&container).contains(&"RESOLVE_DEPENDENCY"));
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_identical_services_get_salted_addresses() {
        let (runtime, bundle) = install(
            r#"
services:
  - { name: Left, class: Worker, fields: { n: 1 }, methods: [{ name: run }] }
  - { name: Right, class: Worker, fields: { n: 1 }, methods: [{ name: run }] }
entry:
  - { service: Left, method: run }
"#,
        );

        let left = bundle.address_of("Left", "run").unwrap();
        let right = bundle.address_of("Right", "run").unwrap();
        assert_ne!(left, right);
        let (left_hash, left_salt) = left.object.rsplit_once('_').unwrap();
        let (right_hash, right_salt) = right.object.rsplit_once('_').unwrap();
        assert_eq!(left_hash, right_hash);
        assert_eq!((left_salt, right_salt), ("1", "2"));
        assert_eq!(runtime.heap().translate_address(&right).unwrap(), "Right.run");
    }

    #[test]
    fn test_script_rejects_pop_before_unload() {
        let (_runtime, bundle) = install(CHECKOUT);
        let target = bundle.program.resolve("Db", "query").unwrap();
        let mut coroutine = ScriptCoroutine::new(Rc::clone(&bundle.program), target);

        coroutine.resume(Resume::Params(vec![json!("x")])).unwrap();
        assert!(coroutine.resume(Resume::ReturnValue(json!(1))).is_err());
    }
}
