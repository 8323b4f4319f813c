//! Execution Timeline
//!
//! Tracks flow lifetimes in ticks for generating run reports and Gantt
//! charts.

use std::collections::BTreeMap;

use crate::execution::{Entities, FlowId, Tick};

/// Width of the chart bar area in characters.
const CHART_WIDTH: usize = 50;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Flow was created
    Spawned,
    /// Flow ran to completion
    Completed,
    /// Flow lost a race, or was awaited by a flow that did
    Cancelled,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub flow_id: FlowId,
    pub name: String,
    pub event_type: EventType,
    pub tick: Tick,
}

/// Lifetime of one flow, as derived from its events.
#[derive(Debug, Clone, PartialEq)]
struct Lifetime {
    name: String,
    start: Tick,
    end: Option<(Tick, EventType)>,
}

/// Tracks the execution timeline of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    /// Tick the run had reached when the timeline was taken
    end_tick: Tick,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from a console snapshot.
    pub fn from_entities(entities: &Entities) -> Self {
        let mut timeline = Self {
            events: Vec::new(),
            end_tick: entities.tick,
        };

        for flow in &entities.active {
            timeline.add_event(flow.id, &flow.name, EventType::Spawned, flow.spawned_at);
        }
        for suspended in &entities.suspended {
            let flow = &suspended.flow;
            timeline.add_event(flow.id, &flow.name, EventType::Spawned, flow.spawned_at);
        }
        for flow in &entities.completed {
            timeline.add_event(flow.id, &flow.name, EventType::Spawned, flow.spawned_at);
            timeline.add_event(flow.id, &flow.name, EventType::Completed, flow.completed_at);
        }
        for flow in &entities.cancelled {
            timeline.add_event(flow.id, &flow.name, EventType::Spawned, flow.spawned_at);
            timeline.add_event(flow.id, &flow.name, EventType::Cancelled, flow.cancelled_at);
        }
        timeline
    }

    /// Records an event for a flow.
    pub fn add_event(&mut self, flow_id: FlowId, name: &str, event_type: EventType, tick: Tick) {
        self.end_tick = self.end_tick.max(tick);
        self.events.push(TimelineEvent {
            flow_id,
            name: name.to_string(),
            event_type,
            tick,
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Number of ticks the timeline spans.
    pub fn span(&self) -> Tick {
        self.end_tick
    }

    fn lifetimes(&self) -> BTreeMap<FlowId, Lifetime> {
        let mut lifetimes: BTreeMap<FlowId, Lifetime> = BTreeMap::new();
        for event in &self.events {
            let lifetime = lifetimes.entry(event.flow_id).or_insert_with(|| Lifetime {
                name: event.name.clone(),
                start: event.tick,
                end: None,
            });
            match event.event_type {
                EventType::Spawned => lifetime.start = event.tick,
                EventType::Completed | EventType::Cancelled => {
                    lifetime.end = Some((event.tick, event.event_type));
                }
            }
        }
        lifetimes
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each flow is one row: `#` while it ran to completion, `x` for a
    /// cancelled flow, `~` for a flow still alive at the end of the run.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let lifetimes = self.lifetimes();
        if lifetimes.is_empty() {
            return output;
        }

        let total = self.end_tick.max(1) as usize;
        let column = |tick: Tick| ((tick as usize).min(total) * CHART_WIDTH) / total;

        let mut rows: Vec<_> = lifetimes.into_iter().collect();
        rows.sort_by_key(|(id, lifetime)| (lifetime.start, *id));

        for (id, lifetime) in rows {
            let (end, fill, note) = match lifetime.end {
                Some((end, EventType::Cancelled)) => {
                    (end, 'x', format!("cancelled after {} ticks", end - lifetime.start))
                }
                Some((end, _)) => (end, '#', format!("{} ticks", end - lifetime.start)),
                None => (self.end_tick, '~', "running".to_string()),
            };

            let start_pos = column(lifetime.start).min(CHART_WIDTH - 1);
            let length = column(end).saturating_sub(start_pos).max(1);
            let mut bar = " ".repeat(start_pos);
            bar.extend(std::iter::repeat(fill).take(length));

            output.push_str(&format!(
                "{} |{:width$}| ({})\n",
                truncate(&format!("#{} {}", id, lifetime.name), 16),
                bar,
                note,
                width = CHART_WIDTH
            ));
        }

        output.push_str(&format!("\nTotal: {} ticks\n", self.end_tick));
        output
    }

    /// Lifetimes in ticks of every flow that finished.
    pub fn get_durations(&self) -> BTreeMap<FlowId, Tick> {
        self.lifetimes()
            .into_iter()
            .filter_map(|(id, lifetime)| lifetime.end.map(|(end, _)| (id, end - lifetime.start)))
            .collect()
    }
}

/// Pads or truncates a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
