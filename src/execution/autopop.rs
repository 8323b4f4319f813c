//! Effect Encapsulation
//!
//! An effect is a collapsed visual container grouping several nodes. Traffic
//! that stays inside one effect is not surfaced step by step; it is buffered
//! here, tagged `is_auto_pop`, and handed out later for fast-forward replay.

use log::debug;

use super::result::{TickResult, TickResultContainer};
use super::Tick;

#[derive(Debug, Clone)]
struct Effect {
    id: String,
    members: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AutoPopManager {
    /// Registered effects in registration order
    effects: Vec<Effect>,
    /// Buffered results, one container per tick
    store: Vec<TickResultContainer>,
}

impl AutoPopManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the members of a collapsed container.
    pub fn add_affected_tree(&mut self, effect_id: impl Into<String>, child_ids: Vec<String>) {
        let effect_id = effect_id.into();
        debug!("Registered effect '{}' with {} nodes", effect_id, child_ids.len());

        let mut members = child_ids;
        members.sort();
        members.dedup();

        match self.effects.iter_mut().find(|e| e.id == effect_id) {
            Some(effect) => effect.members = members,
            None => self.effects.push(Effect {
                id: effect_id,
                members,
            }),
        }
    }

    /// Smallest effect containing `node_id`. Equal sizes go to the earliest
    /// registration.
    pub fn get_entity_affected_by(&self, node_id: &str) -> Option<&str> {
        self.effects
            .iter()
            .filter(|e| e.members.binary_search_by(|m| m.as_str().cmp(node_id)).is_ok())
            .min_by_key(|e| e.members.len())
            .map(|e| e.id.as_str())
    }

    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    /// Buffers a result produced while stepping inside an effect.
    pub fn add_to_tick_result_store(&mut self, tick: Tick, result: TickResult) {
        match self.store.last_mut() {
            Some(container) if container.tick == tick => container.results.push(result),
            _ => {
                let mut container = TickResultContainer::new(tick);
                container.results.push(result);
                self.store.push(container);
            }
        }
        if let Some(container) = self.store.last_mut() {
            container.mark_auto_pop();
        }
    }

    pub fn stored_len(&self) -> usize {
        self.store.len()
    }

    /// Hands out every buffered container, oldest first, and empties the store.
    pub fn flush_all_stored_tick_results(&mut self) -> Vec<TickResultContainer> {
        std::mem::take(&mut self.store)
    }

    /// Drops buffered results but keeps registered effects.
    pub fn clear_store(&mut self) {
        self.store.clear();
    }

    pub fn reset(&mut self) {
        self.effects.clear();
        self.store.clear();
    }
}
