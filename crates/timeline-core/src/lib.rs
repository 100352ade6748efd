//! Core of the chat timeline store.
//!
//! This crate keeps a serial-ordered, deduplicated message sequence per room,
//! tracks history paging, and selects the bounded window handed to renderers.
//! It also defines the command/event protocol used by the async runtime.

/// Async command/event channel primitives.
pub mod channel;
/// Environment-backed configuration.
pub mod config;
/// Stable error types.
pub mod error;
/// History paging state machine and request types.
pub mod history;
/// Serial existence set and binary-search helpers.
pub mod serial_index;
/// Room-bound store combining every piece.
pub mod store;
/// Message model and protocol types.
pub mod types;
/// Batch upsert of message occurrences.
pub mod upsert;
/// Bounded render window selection.
pub mod window;

pub use channel::{CommandReceiver, EventStream, TimelineChannelError, TimelineChannels};
pub use config::{ConfigError, TimelineConfig};
pub use error::{TimelineError, TimelineErrorCategory, TimelineMergeError};
pub use history::{
    HistoryLoader, LoadState, PageKind, PageRequest, bounded_paginate_limit, chronological,
};
pub use serial_index::{SerialIndex, index_of, insertion_index};
pub use store::{PageOutcome, RoomTimeline};
pub use types::{
    HistoryPage, Message, MessageAction, MessageEvent, ReactionAggregate, ReactionSummary,
    Reactions, TimelineCommand, TimelineEvent, TimelineSnapshot,
};
pub use upsert::{ApplyMode, BatchOutcome, MessageSequence, OldestMarker, UpsertEngine};
pub use window::{WindowAnchor, WindowSelector};
