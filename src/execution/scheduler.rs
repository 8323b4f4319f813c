//! Scheduled Tasks
//!
//! Timers and intervals registered by the simulated program. Each task is
//! stepped exactly once per outer tick and answers with a
//! [`ScheduleSignal`]; a spawn signal becomes a new flow.
//!
//! - Timer: fires once on its N-th step (N = 0 behaves like 1), then finishes
//! - Interval: fires on every N-th step forever, naming flows `#1`, `#2`, ...

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use super::protocol::FlowRecipe;
use super::{TaskId, Tick};
use crate::error::RuntimeError;

/// Answer of one scheduler step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSignal {
    NoOp,
    Spawn { name: String },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Timer,
    Interval,
}

#[derive(Debug, Clone)]
pub struct TimerScheduler {
    after: u64,
    elapsed: u64,
    fired: bool,
}

impl TimerScheduler {
    pub fn new(after: u64) -> Self {
        Self {
            after: after.max(1),
            elapsed: 0,
            fired: false,
        }
    }

    /// `None` once the timer has fired.
    pub fn next(&mut self, name: &str) -> Option<ScheduleSignal> {
        if self.fired {
            return None;
        }
        self.elapsed += 1;
        if self.elapsed < self.after {
            return Some(ScheduleSignal::NoOp);
        }
        self.fired = true;
        Some(ScheduleSignal::Spawn {
            name: name.to_string(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.fired
    }
}

#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    every: u64,
    elapsed: u64,
    spawned: u64,
}

impl IntervalScheduler {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            elapsed: 0,
            spawned: 0,
        }
    }

    pub fn next(&mut self, name: &str) -> Option<ScheduleSignal> {
        self.elapsed += 1;
        if self.elapsed % self.every != 0 {
            return Some(ScheduleSignal::NoOp);
        }
        self.spawned += 1;
        Some(ScheduleSignal::Spawn {
            name: format!("{}#{}", name, self.spawned),
        })
    }
}

#[derive(Debug, Clone)]
enum Schedule {
    Timer(TimerScheduler),
    Interval(IntervalScheduler),
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub period: u64,
    pub registered_at: Tick,
    pub spawned: Vec<String>,
    recipe: FlowRecipe,
    schedule: Schedule,
}

impl ScheduledTask {
    fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            period: self.period,
            registered_at: self.registered_at,
            spawned: self.spawned.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub period: u64,
    pub registered_at: Tick,
    /// Names of flows spawned so far
    pub spawned: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScheduledTaskManager {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, ScheduledTask>,
    completed: BTreeMap<TaskId, TaskSummary>,
}

impl ScheduledTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_timer(&mut self, name: impl Into<String>, after: u64, recipe: FlowRecipe, now: Tick) -> TaskId {
        self.add(name.into(), TaskKind::Timer, after, recipe, now)
    }

    pub fn add_interval(&mut self, name: impl Into<String>, every: u64, recipe: FlowRecipe, now: Tick) -> TaskId {
        self.add(name.into(), TaskKind::Interval, every, recipe, now)
    }

    fn add(&mut self, name: String, kind: TaskKind, period: u64, recipe: FlowRecipe, now: Tick) -> TaskId {
        self.next_id += 1;
        let schedule = match kind {
            TaskKind::Timer => Schedule::Timer(TimerScheduler::new(period)),
            TaskKind::Interval => Schedule::Interval(IntervalScheduler::new(period)),
        };
        debug!("Scheduled {:?} '{}' every/after {} ticks", kind, name, period);
        self.tasks.insert(
            self.next_id,
            ScheduledTask {
                id: self.next_id,
                name,
                kind,
                period,
                registered_at: now,
                spawned: Vec::new(),
                recipe,
                schedule,
            },
        );
        self.next_id
    }

    /// Steps one task once. Returns the recipe to spawn, if the task fired.
    ///
    /// A timer that has fired moves to the completed set.
    pub fn tick(&mut self, task_id: TaskId) -> Result<Option<FlowRecipe>, RuntimeError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(RuntimeError::UnknownTask { task_id })?;

        let signal = match &mut task.schedule {
            Schedule::Timer(timer) => timer.next(&task.name),
            Schedule::Interval(interval) => interval.next(&task.name),
        };

        let spawn = match signal {
            Some(ScheduleSignal::Spawn { name }) => {
                debug!("Task {} '{}' spawns flow '{}'", task_id, task.name, name);
                task.spawned.push(name.clone());
                Some(task.recipe.renamed(name))
            }
            Some(ScheduleSignal::NoOp) | None => None,
        };

        let finished = matches!(&task.schedule, Schedule::Timer(timer) if timer.is_finished());
        if finished {
            if let Some(task) = self.tasks.remove(&task_id) {
                self.completed.insert(task_id, task.summary());
            }
        }
        Ok(spawn)
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.tasks.values().map(ScheduledTask::summary).collect()
    }

    pub fn completed(&self) -> Vec<TaskSummary> {
        self.completed.values().cloned().collect()
    }
}
