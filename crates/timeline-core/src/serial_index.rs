use std::collections::HashSet;

use crate::types::Message;

/// Set of serials held by a message sequence.
///
/// Answers existence in O(1); positions are found by binary search over the
/// serial-sorted sequence itself. The set must be cleared whenever the
/// sequence it indexes is cleared.
#[derive(Debug, Clone, Default)]
pub struct SerialIndex {
    known: HashSet<String>,
}

impl SerialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index for an existing sorted sequence.
    pub fn from_sequence(sequence: &[Message]) -> Self {
        Self {
            known: sequence.iter().map(|m| m.serial.clone()).collect(),
        }
    }

    pub fn exists(&self, serial: &str) -> bool {
        self.known.contains(serial)
    }

    /// Record a serial as present. Returns `false` if it was already known.
    pub fn mark(&mut self, serial: &str) -> bool {
        self.known.insert(serial.to_owned())
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Exact position of `serial` in a serial-sorted sequence.
pub fn index_of(sequence: &[Message], serial: &str) -> Option<usize> {
    sequence
        .binary_search_by(|item| item.serial.as_str().cmp(serial))
        .ok()
}

/// Left-most position where `candidate` keeps the sequence sorted.
pub fn insertion_index(sequence: &[Message], candidate: &Message) -> usize {
    sequence.partition_point(|item| item.before(candidate))
}
