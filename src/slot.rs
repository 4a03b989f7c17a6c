use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    asset_name: Option<String>,
}

/// A reusable display cell. Every assignment starts a new generation, and a
/// result computed for an older generation is dropped on delivery.
#[derive(Debug, Default)]
pub struct DisplaySlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTicket {
    generation: u64,
    asset_name: String,
}

impl SlotTicket {
    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, asset_name: &str) -> SlotTicket {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.generation += 1;
        state.asset_name = Some(asset_name.to_owned());

        SlotTicket {
            generation: state.generation,
            asset_name: asset_name.to_owned(),
        }
    }

    /// Detaches the slot from any asset; outstanding tickets become stale.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.generation += 1;
        state.asset_name = None;
    }

    pub fn is_current(&self, ticket: &SlotTicket) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.generation == ticket.generation
            && state.asset_name.as_deref() == Some(ticket.asset_name.as_str())
    }

    /// Hands `value` back if the ticket still matches the slot, otherwise drops it.
    pub fn deliver<T>(&self, ticket: &SlotTicket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            log::debug!(
                "Discarding stale result for {} (generation {})",
                ticket.asset_name,
                ticket.generation
            );

            None
        }
    }
}
