use std::sync::Arc;

use crate::storage::vectors::Slot;

/// A point that is stored but not yet linked into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedEntry {
    pub id: u64,
    pub slot: Slot,
}

/// A drained set of entries on its way into the graph. The entries remain
/// visible to buffer scans until `IngestBuffer::complete` is called with the
/// ticket.
#[derive(Debug, Clone)]
pub struct Flush {
    pub ticket: u64,
    pub entries: Arc<Vec<BufferedEntry>>,
}

#[derive(Debug)]
pub enum StageOutcome {
    Accepted,
    /// The entry filled the buffer; the caller must commit this flush.
    FlushTriggered(Flush),
}

/// Bounded staging area for streamed inserts.
///
/// # Logic
/// Entries accumulate in insertion order until `capacity` is reached. The
/// full set is then swapped out in one step for an empty vector and parked
/// as in-flight, so new inserts keep staging while the previous batch is
/// built. Queries scan both the active and in-flight entries.
#[derive(Debug)]
pub struct IngestBuffer {
    capacity: usize,
    active: Vec<BufferedEntry>,
    in_flight: Vec<Flush>,
    next_ticket: u64,
}

impl IngestBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            active: Vec::with_capacity(capacity),
            in_flight: Vec::new(),
            next_ticket: 0,
        }
    }

    /// Active entries; always below `capacity` between calls.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.iter().map(|f| f.entries.len()).sum()
    }

    pub fn stage(&mut self, entry: BufferedEntry) -> StageOutcome {
        self.active.push(entry);
        if self.active.len() >= self.capacity {
            match self.drain() {
                Some(flush) => StageOutcome::FlushTriggered(flush),
                None => StageOutcome::Accepted,
            }
        } else {
            StageOutcome::Accepted
        }
    }

    /// Swaps out all active entries. Returns `None` when there is nothing to
    /// flush.
    pub fn drain(&mut self) -> Option<Flush> {
        if self.active.is_empty() {
            return None;
        }
        let entries = std::mem::replace(&mut self.active, Vec::with_capacity(self.capacity));
        Some(self.register(entries))
    }

    /// Parks entries that bypass staging (oversized insert calls) so they stay
    /// searchable until committed.
    pub fn register(&mut self, entries: Vec<BufferedEntry>) -> Flush {
        let flush = Flush {
            ticket: self.next_ticket,
            entries: Arc::new(entries),
        };
        self.next_ticket += 1;
        self.in_flight.push(flush.clone());
        flush
    }

    /// Forgets an in-flight flush once its graph merge has completed.
    pub fn complete(&mut self, ticket: u64) {
        self.in_flight.retain(|f| f.ticket != ticket);
    }

    /// Every entry a query has to scan: active first, then in-flight.
    pub fn snapshot(&self) -> Vec<BufferedEntry> {
        let mut entries = Vec::with_capacity(self.active.len() + self.in_flight_len());
        entries.extend_from_slice(&self.active);
        for flush in &self.in_flight {
            entries.extend_from_slice(&flush.entries);
        }
        entries
    }
}
