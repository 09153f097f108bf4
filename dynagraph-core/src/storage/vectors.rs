use std::collections::HashMap;

use log::info;

use crate::error::{IndexError, Result};

/// Internal position of a vector in the arena.
pub type Slot = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Live(u64),
    /// Superseded by a reinsert of the same id; invisible, awaiting compaction.
    Retired(u64),
}

/// Arena of raw vectors with an external id <-> slot mapping.
///
/// # Logic
/// Vectors live back to back in one flat `Vec<f32>` (slot * dimension).
/// Reclaimed slots go onto a free list and are handed out again before the
/// arena grows, so memory stays bounded under insert/delete churn.
pub struct VectorStore {
    dimension: usize,
    max_points: usize,
    update_on_reinsert: bool,
    arena: Vec<f32>,
    states: Vec<SlotState>,
    map: HashMap<u64, Slot>,
    free_slots: Vec<Slot>,
    resident: usize,
}

impl VectorStore {
    pub fn new(dimension: usize, max_points: usize, update_on_reinsert: bool) -> Self {
        info!("Initializing VectorStore (Dim: {}, Max: {})", dimension, max_points);
        Self {
            dimension,
            max_points,
            update_on_reinsert,
            arena: Vec::new(),
            states: Vec::new(),
            map: HashMap::new(),
            free_slots: Vec::new(),
            resident: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stores `vector` under `id` and returns its slot.
    ///
    /// # Errors
    /// * `DimensionMismatch` if the vector length is not the index dimension.
    /// * `DuplicateId` if `id` is live and updates are disabled. With updates
    ///   enabled the previous slot is retired instead.
    /// * `CapacityExceeded` if every one of `max_points` slots is resident.
    pub fn store(&mut self, id: u64, vector: &[f32]) -> Result<Slot> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let previous = self.map.get(&id).copied();
        if previous.is_some() && !self.update_on_reinsert {
            return Err(IndexError::DuplicateId(id));
        }
        if self.resident >= self.max_points {
            return Err(IndexError::CapacityExceeded { max_points: self.max_points });
        }
        if let Some(old) = previous {
            self.states[old as usize] = SlotState::Retired(id);
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                let offset = slot as usize * self.dimension;
                self.arena[offset..offset + self.dimension].copy_from_slice(vector);
                slot
            }
            None => {
                let slot = self.states.len() as Slot;
                self.arena.extend_from_slice(vector);
                self.states.push(SlotState::Free);
                slot
            }
        };
        self.states[slot as usize] = SlotState::Live(id);
        self.map.insert(id, slot);
        self.resident += 1;
        Ok(slot)
    }

    /// Retires the live slot of `id` so the id can be stored again. Used when
    /// a tombstoned id is reinserted before compaction.
    pub fn detach(&mut self, id: u64) -> Option<Slot> {
        let slot = self.map.remove(&id)?;
        self.states[slot as usize] = SlotState::Retired(id);
        Some(slot)
    }

    /// Returns `slot` to the free list. Only compaction calls this.
    pub fn reclaim(&mut self, slot: Slot) {
        let Some(state) = self.states.get(slot as usize).copied() else {
            return;
        };
        match state {
            SlotState::Free => return,
            SlotState::Live(id) => {
                self.map.remove(&id);
            }
            SlotState::Retired(_) => {}
        }
        self.states[slot as usize] = SlotState::Free;
        self.free_slots.push(slot);
        self.resident -= 1;
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> &[f32] {
        let offset = slot as usize * self.dimension;
        &self.arena[offset..offset + self.dimension]
    }

    /// External id of a live slot.
    #[inline]
    pub fn id_of(&self, slot: Slot) -> Option<u64> {
        match self.states.get(slot as usize) {
            Some(SlotState::Live(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn slot_of(&self, id: u64) -> Option<Slot> {
        self.map.get(&id).copied()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.map.contains_key(&id)
    }

    /// Slots holding a vector, live or retired.
    pub fn resident(&self) -> usize {
        self.resident
    }

    /// Ids currently mapped to a slot (tombstoned ids included).
    pub fn live(&self) -> usize {
        self.map.len()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn retired_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.states.iter().enumerate().filter_map(|(slot, state)| match state {
            SlotState::Retired(_) => Some(slot as Slot),
            _ => None,
        })
    }
}
