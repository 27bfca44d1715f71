//! Fixed-capacity table mapping action names to handlers

use super::handlers::ActionHandler;
use crate::error::AgentError;
use device_agent_shared::limits::MAX_ACTIONS;
use std::sync::Arc;

struct ActionEntry {
    name: String,
    handler: Arc<dyn ActionHandler>,
}

/// Name to handler table with `N` slots.
///
/// Slots keep their position for the life of an entry: `remove` empties a
/// slot without compacting, and `add` fills the first empty slot. A failed
/// operation leaves the table unchanged.
pub struct ActionRegistry<const N: usize = MAX_ACTIONS> {
    slots: [Option<ActionEntry>; N],
}

impl<const N: usize> ActionRegistry<N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.name == name))
    }

    /// Register `handler` under `name`, returning the slot it landed in
    pub fn add(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<usize, AgentError> {
        let name = name.into();
        if self.position(&name).is_some() {
            return Err(AgentError::DuplicateAction(name));
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AgentError::RegistryFull)?;

        self.slots[index] = Some(ActionEntry { name, handler });
        Ok(index)
    }

    /// Replace the handler of an existing action in place
    pub fn update(&mut self, name: &str, handler: Arc<dyn ActionHandler>) -> Result<(), AgentError> {
        let index = self
            .position(name)
            .ok_or_else(|| AgentError::ActionNotFound(name.to_string()))?;

        if let Some(entry) = self.slots[index].as_mut() {
            entry.handler = handler;
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), AgentError> {
        let index = self
            .position(name)
            .ok_or_else(|| AgentError::ActionNotFound(name.to_string()))?;

        self.slots[index] = None;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<Arc<dyn ActionHandler>, AgentError> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.name == name)
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| AgentError::ActionNotFound(name.to_string()))
    }

    /// Occupied slots as `(index, name)`, in slot order
    pub fn list(&self) -> Vec<(usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|entry| (i, entry.name.as_str())))
            .collect()
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for ActionRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
