//! Scenario Validation
//!
//! Checks a parsed scenario before anything is installed into a runtime:
//! - Service and method name uniqueness
//! - Reference integrity of every call, entry, timer, interval and effect
//! - Await shapes (SINGLE takes one call, RACE at least one)
//! - Every `$name` is bound before use

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{variable_refs, CallDef, Instruction, MethodDef, Scenario, ServiceDef};
use crate::execution::AwaitStrategy;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyScenario,
    EmptyServiceName,
    DuplicateService(String),
    DuplicateMethod { service: String, method: String },
    UnknownService { context: String, service: String },
    UnknownMethod { context: String, service: String, method: String },
    InvalidAwait { context: String, strategy: AwaitStrategy, calls: usize },
    UnboundVariable { context: String, name: String },
    UnknownEffectNode { effect: String, node: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyScenario => write!(f, "Scenario declares no services"),
            Self::EmptyServiceName => write!(f, "Service has empty or whitespace-only name"),
            Self::DuplicateService(name) => write!(f, "Duplicate service name: '{}'", name),
            Self::DuplicateMethod { service, method } => {
                write!(f, "Service '{}' declares method '{}' twice", service, method)
            }
            Self::UnknownService { context, service } => {
                write!(f, "{} references unknown service '{}'", context, service)
            }
            Self::UnknownMethod {
                context,
                service,
                method,
            } => write!(
                f,
                "{} references unknown method '{}.{}'",
                context, service, method
            ),
            Self::InvalidAwait {
                context,
                strategy,
                calls,
            } => write!(
                f,
                "{}: {} await cannot take {} calls",
                context, strategy, calls
            ),
            Self::UnboundVariable { context, name } => {
                write!(f, "{} uses '${}' before it is bound", context, name)
            }
            Self::UnknownEffectNode { effect, node } => {
                write!(f, "Effect '{}' lists unknown node '{}'", effect, node)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Resolves a call target to the callee definition.
pub fn resolve_call<'a>(
    scenario: &'a Scenario,
    call: &CallDef,
    context: &str,
) -> Result<(&'a ServiceDef, &'a MethodDef), ValidationError> {
    let service = scenario
        .services
        .iter()
        .find(|s| s.name == call.service)
        .ok_or_else(|| ValidationError::UnknownService {
            context: context.to_string(),
            service: call.service.clone(),
        })?;
    let method = service
        .method(&call.method)
        .ok_or_else(|| ValidationError::UnknownMethod {
            context: context.to_string(),
            service: call.service.clone(),
            method: call.method.clone(),
        })?;

    if call.args.len() != method.params.len() {
        warn!(
            "{}: '{}' takes {} params but is called with {} args",
            context,
            call.node_id(),
            method.params.len(),
            call.args.len()
        );
    }
    Ok((service, method))
}

/// Checks one call site: target exists, arguments only use bound names.
fn validate_call(
    scenario: &Scenario,
    call: &CallDef,
    context: &str,
    bound: &HashSet<String>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if let Err(e) = resolve_call(scenario, call, context) {
        errors.push(e);
    }
    for arg in &call.args {
        errors.extend(unbound(arg, context, bound));
    }
    errors
}

fn unbound(value: &serde_json::Value, context: &str, bound: &HashSet<String>) -> Vec<ValidationError> {
    variable_refs(value)
        .into_iter()
        .filter(|name| !bound.contains(*name))
        .map(|name| ValidationError::UnboundVariable {
            context: context.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// Walks a method body in order, tracking which locals are bound.
fn validate_method(scenario: &Scenario, service: &ServiceDef, method: &MethodDef) -> Vec<ValidationError> {
    let context = format!("{}.{}", service.name, method.name);
    let mut errors = Vec::new();
    let mut bound: HashSet<String> = service.fields.keys().cloned().collect();
    bound.extend(method.params.iter().cloned());

    for instruction in &method.body {
        match instruction {
            Instruction::Log(value) | Instruction::Return(value) => {
                errors.extend(unbound(value, &context, &bound));
            }
            Instruction::Sleep(0) => {
                debug!("{}: sleep 0 is a no-op", context);
            }
            Instruction::Sleep(_) => {}
            Instruction::Call(call) => {
                errors.extend(validate_call(scenario, call, &context, &bound));
                if let Some(name) = &call.bind {
                    bound.insert(name.clone());
                }
            }
            Instruction::Await(await_def) => {
                let calls = await_def.calls.len();
                let bad_shape = match await_def.strategy {
                    AwaitStrategy::Single => calls != 1,
                    AwaitStrategy::Race => calls == 0,
                    AwaitStrategy::WaitForAll => false,
                };
                if bad_shape {
                    errors.push(ValidationError::InvalidAwait {
                        context: context.clone(),
                        strategy: await_def.strategy,
                        calls,
                    });
                }
                for call in &await_def.calls {
                    errors.extend(validate_call(scenario, call, &context, &bound));
                    if call.bind.is_some() {
                        warn!("{}: bind on an awaited call is ignored, bind the await instead", context);
                    }
                }
                if let Some(name) = &await_def.bind {
                    bound.insert(name.clone());
                }
            }
        }
    }
    errors
}

/// Validates the entire scenario structure.
///
/// Performs the following checks:
/// 1. Scenario declares at least one service
/// 2. No duplicate service names, no duplicate method names per service
/// 3. Every call and await target exists, awaits have a valid shape
/// 4. Every `$name` is bound before it is used
/// 5. Entry calls, timers, intervals and effects reference existing methods
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    info!("Validating scenario with {} services", scenario.services.len());

    if scenario.services.is_empty() {
        return Err(ValidationError::EmptyScenario.to_string());
    }

    let mut all_errors = Vec::new();
    let mut seen_services: HashSet<&str> = HashSet::new();
    for service in &scenario.services {
        if service.name.trim().is_empty() {
            all_errors.push(ValidationError::EmptyServiceName);
            continue;
        }
        if !seen_services.insert(service.name.as_str()) {
            all_errors.push(ValidationError::DuplicateService(service.name.clone()));
        }

        let mut seen_methods: HashSet<&str> = HashSet::new();
        for method in &service.methods {
            if !seen_methods.insert(method.name.as_str()) {
                all_errors.push(ValidationError::DuplicateMethod {
                    service: service.name.clone(),
                    method: method.name.clone(),
                });
            }
            all_errors.extend(validate_method(scenario, service, method));
        }
    }

    let no_locals = HashSet::new();
    for (i, call) in scenario.entry.iter().enumerate() {
        let context = format!("Entry #{}", i + 1);
        all_errors.extend(validate_call(scenario, call, &context, &no_locals));
    }
    for timer in &scenario.timers {
        let context = format!("Timer '{}'", timer.name);
        all_errors.extend(validate_call(scenario, &timer.call, &context, &no_locals));
    }
    for interval in &scenario.intervals {
        let context = format!("Interval '{}'", interval.name);
        all_errors.extend(validate_call(scenario, &interval.call, &context, &no_locals));
    }

    let nodes: HashSet<String> = scenario
        .services
        .iter()
        .flat_map(|s| s.methods.iter().map(move |m| format!("{}.{}", s.name, m.name)))
        .collect();
    for effect in &scenario.effects {
        for node in &effect.nodes {
            if !nodes.contains(node) {
                all_errors.push(ValidationError::UnknownEffectNode {
                    effect: effect.id.clone(),
                    node: node.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    if scenario.entry.is_empty() && scenario.timers.is_empty() && scenario.intervals.is_empty() {
        warn!("Scenario has no entry calls, timers or intervals; nothing will run");
    }

    info!(
        "Scenario validated: {} services, {} methods",
        scenario.services.len(),
        nodes.len()
    );
    Ok(())
}
