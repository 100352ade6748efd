use std::{borrow::Cow, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::{
    error::TimelineMergeError,
    serial_index::{SerialIndex, index_of, insertion_index},
    types::{Message, MessageAction, MessageEvent},
};

/// Immutable, serial-sorted message sequence. Replaced wholesale on change.
pub type MessageSequence = Arc<Vec<Message>>;

/// How a batch relates to the current sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Real-time occurrences and the initial backfill.
    Append,
    /// An older history page, already in chronological order.
    Prepend,
}

/// Oldest message known after the last change; the boundary for older pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OldestMarker {
    pub serial: String,
    pub created_at_ms: u64,
}

impl From<&Message> for OldestMarker {
    fn from(message: &Message) -> Self {
        Self {
            serial: message.serial.clone(),
            created_at_ms: message.created_at_ms,
        }
    }
}

/// Result of applying one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Resulting sequence. Pointer-equal to the input when nothing changed.
    pub sequence: MessageSequence,
    /// Whether any entry was inserted or replaced.
    pub changed: bool,
    /// Items skipped because the index and sequence disagreed.
    pub anomalies: Vec<TimelineMergeError>,
}

impl BatchOutcome {
    fn unchanged(current: &MessageSequence, anomalies: Vec<TimelineMergeError>) -> Self {
        Self {
            sequence: Arc::clone(current),
            changed: false,
            anomalies,
        }
    }
}

/// Merges occurrence batches into a serial-sorted, deduplicated sequence.
#[derive(Debug, Clone, Default)]
pub struct UpsertEngine {
    index: SerialIndex,
    oldest: Option<OldestMarker>,
}

impl UpsertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &SerialIndex {
        &self.index
    }

    pub fn oldest(&self) -> Option<&OldestMarker> {
        self.oldest.as_ref()
    }

    /// Forget every known serial. Call together with clearing the sequence.
    pub fn reset(&mut self) {
        self.index.clear();
        self.oldest = None;
    }

    /// Apply occurrences in batch order.
    ///
    /// Unknown serials are inserted at their sorted position, known serials are
    /// merged in place, duplicate creates are skipped. Returns the input
    /// sequence itself when no entry changed.
    pub fn apply_batch(
        &mut self,
        current: &MessageSequence,
        batch: &[MessageEvent],
        mode: ApplyMode,
    ) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::unchanged(current, Vec::new());
        }

        let mut sequence: Cow<'_, [Message]> = Cow::Borrowed(current.as_slice());
        let mut anomalies = Vec::new();

        for occurrence in batch {
            if sequence.is_empty() && !self.index.is_empty() {
                debug!(
                    stale_serials = self.index.len(),
                    "sequence is empty but serial index is not; resetting index"
                );
                self.index.clear();
            }

            let serial = occurrence.serial();

            if !self.index.exists(serial) {
                let Some(message) = occurrence.message() else {
                    trace!(serial, "ignoring reaction summary for unloaded message");
                    continue;
                };

                let position = match sequence.first() {
                    Some(first) if mode == ApplyMode::Prepend && message.before(first) => 0,
                    _ => insertion_index(&sequence, message),
                };
                sequence.to_mut().insert(position, message.clone());
                self.index.mark(serial);
                continue;
            }

            if occurrence.action() == MessageAction::Create {
                trace!(serial, "skipping duplicate create");
                continue;
            }

            let Some(position) = index_of(&sequence, serial) else {
                let err = TimelineMergeError::IndexCorruption(serial.to_owned());
                error!(serial, error = %err, "skipping occurrence");
                anomalies.push(err);
                continue;
            };

            let merged = sequence[position].merge_with(occurrence);
            if let Some(merged) = merged {
                sequence.to_mut()[position] = merged;
            }
        }

        match sequence {
            Cow::Borrowed(_) => BatchOutcome::unchanged(current, anomalies),
            Cow::Owned(next) => {
                self.oldest = next.first().map(OldestMarker::from);
                BatchOutcome {
                    sequence: Arc::new(next),
                    changed: true,
                    anomalies,
                }
            }
        }
    }
}
