//! History source boundary for the timeline store.
//!
//! The chat SDK is reached only through [`HistorySource`]; everything it
//! returns is converted to core types before it reaches the store.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use timeline_core::{HistoryPage, Message, PageKind, PageRequest, TimelineError};
use tracing::debug;

/// History queries offered by the chat SDK.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Newest `limit` messages that precede the real-time subscription, newest first.
    async fn history_before_subscription(
        &self,
        room_id: &str,
        limit: u16,
    ) -> Result<HistoryPage, TimelineError>;

    /// Up to `limit` messages created at or before `end_ms`, newest first.
    async fn history(
        &self,
        room_id: &str,
        end_ms: u64,
        limit: u16,
    ) -> Result<HistoryPage, TimelineError>;
}

/// Run the query a page request maps to.
pub async fn fetch_page<S>(source: &S, request: &PageRequest) -> Result<HistoryPage, TimelineError>
where
    S: HistorySource + ?Sized,
{
    debug!(room_id = %request.room_id, kind = ?request.kind, "fetching history page");
    match request.kind {
        PageKind::Initial { limit } => {
            source
                .history_before_subscription(&request.room_id, limit)
                .await
        }
        PageKind::Older { end_ms, limit } => source.history(&request.room_id, end_ms, limit).await,
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    rooms: HashMap<String, Vec<Message>>,
    failures: VecDeque<TimelineError>,
    requests: Vec<PageRequestLog>,
}

/// One query observed by [`InMemoryHistorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequestLog {
    pub room_id: String,
    pub kind: PageKind,
}

/// Thread-safe in-memory history, used by tests and the smoke binary.
#[derive(Clone, Default)]
pub struct InMemoryHistorySource {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store messages for a room, keeping serial order and dropping duplicates.
    pub fn insert_messages(
        &self,
        room_id: &str,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(), TimelineError> {
        let mut state = self.write()?;
        let room = state.rooms.entry(room_id.to_owned()).or_default();
        for message in messages {
            match room.binary_search_by(|item| item.serial.cmp(&message.serial)) {
                Ok(existing) => room[existing] = message,
                Err(position) => room.insert(position, message),
            }
        }
        Ok(())
    }

    /// Make the next query fail with `error`.
    pub fn fail_next(&self, error: TimelineError) -> Result<(), TimelineError> {
        self.write()?.failures.push_back(error);
        Ok(())
    }

    /// Queries served so far, in order.
    pub fn requests(&self) -> Result<Vec<PageRequestLog>, TimelineError> {
        Ok(self.read()?.requests.clone())
    }

    fn serve(
        &self,
        room_id: &str,
        kind: PageKind,
        filter: impl Fn(&Message) -> bool,
    ) -> Result<HistoryPage, TimelineError> {
        let mut state = self.write()?;
        state.requests.push(PageRequestLog {
            room_id: room_id.to_owned(),
            kind: kind.clone(),
        });
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let room = state.rooms.get(room_id).ok_or_else(|| {
            TimelineError::not_found("room_not_found", format!("room not found: {room_id}"))
        })?;

        let limit = usize::from(kind.limit());
        let mut matching = room.iter().rev().filter(|m| filter(m));
        let items: Vec<Message> = matching.by_ref().take(limit).cloned().collect();
        let has_next = matching.next().is_some();
        Ok(HistoryPage { items, has_next })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, InMemoryState>, TimelineError> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, InMemoryState>, TimelineError> {
        self.state.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl HistorySource for InMemoryHistorySource {
    async fn history_before_subscription(
        &self,
        room_id: &str,
        limit: u16,
    ) -> Result<HistoryPage, TimelineError> {
        self.serve(room_id, PageKind::Initial { limit }, |_| true)
    }

    async fn history(
        &self,
        room_id: &str,
        end_ms: u64,
        limit: u16,
    ) -> Result<HistoryPage, TimelineError> {
        self.serve(room_id, PageKind::Older { end_ms, limit }, |m| {
            m.created_at_ms <= end_ms
        })
    }
}

fn poisoned() -> TimelineError {
    TimelineError::internal("history_store_poisoned", "poisoned lock")
}
