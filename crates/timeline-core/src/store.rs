//! Room-bound message store combining ordering, paging and the render window.

use tracing::{debug, info, warn};

use crate::{
    config::TimelineConfig,
    error::TimelineError,
    history::{HistoryLoader, PageKind, PageRequest, chronological},
    types::{HistoryPage, Message, MessageEvent, TimelineSnapshot},
    upsert::{ApplyMode, MessageSequence, UpsertEngine},
    window::{WindowAnchor, WindowSelector},
};

/// What happened to a completed history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was merged into the sequence.
    Applied {
        /// Whether the merge changed the sequence.
        changed: bool,
    },
    /// The request belongs to another room or an earlier session and was dropped.
    Stale,
    /// The fetch failed; paging state returned to idle.
    Failed(TimelineError),
}

/// Ordered message store owned by one room session.
#[derive(Debug, Clone)]
pub struct RoomTimeline {
    room_id: String,
    session: u64,
    /// The only request whose completion is accepted.
    outstanding: Option<PageRequest>,
    sequence: MessageSequence,
    engine: UpsertEngine,
    loader: HistoryLoader,
    window: WindowSelector,
}

impl RoomTimeline {
    /// Open a store for `room_id`.
    ///
    /// `session` must be greater than the last session of any earlier store
    /// for the same room, so pages issued by that store are never accepted here.
    pub fn new(room_id: impl Into<String>, session: u64, config: &TimelineConfig) -> Self {
        Self {
            room_id: room_id.into(),
            session,
            outstanding: None,
            sequence: MessageSequence::default(),
            engine: UpsertEngine::new(),
            loader: HistoryLoader::new(config.bounded_initial_limit(), config.bounded_page_size()),
            window: WindowSelector::new(config.window_size),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current session; bumped by every discontinuity reset.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Full ordered sequence.
    pub fn sequence(&self) -> &MessageSequence {
        &self.sequence
    }

    /// Messages currently selected for rendering.
    pub fn active_window(&self) -> &[Message] {
        self.window.window(&self.sequence)
    }

    pub fn has_more_history(&self) -> bool {
        self.loader.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    /// Apply real-time occurrences. Returns whether the sequence changed.
    pub fn apply_events(&mut self, events: &[MessageEvent]) -> bool {
        self.apply(events, ApplyMode::Append)
    }

    /// Issue the initial backfill request for this session.
    pub fn begin_initial_backfill(&mut self) -> Option<PageRequest> {
        let kind = self.loader.begin_initial()?;
        Some(self.request(kind))
    }

    /// Issue a request for the page before the oldest loaded message.
    pub fn begin_load_more(&mut self) -> Option<PageRequest> {
        let kind = self.loader.begin_older(self.sequence.first())?;
        Some(self.request(kind))
    }

    /// Feed the result of a request back into the store.
    pub fn complete_page(
        &mut self,
        request: &PageRequest,
        result: Result<HistoryPage, TimelineError>,
    ) -> PageOutcome {
        if self.outstanding.as_ref() != Some(request) {
            debug!(
                room_id = %request.room_id,
                request_session = request.session,
                session = self.session,
                kind = ?request.kind,
                "discarding stale history page"
            );
            return PageOutcome::Stale;
        }
        self.outstanding = None;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "history page request failed");
                self.loader.fail();
                return PageOutcome::Failed(err);
            }
        };

        let added = page
            .items
            .iter()
            .filter(|m| !self.engine.index().exists(&m.serial))
            .count();
        self.loader.complete(&request.kind, &page, added);
        let mode = match request.kind {
            PageKind::Initial { .. } => ApplyMode::Append,
            PageKind::Older { .. } => ApplyMode::Prepend,
        };
        let batch: Vec<MessageEvent> = chronological(page)
            .into_iter()
            .map(MessageEvent::Created)
            .collect();
        let changed = self.apply(&batch, mode);

        debug!(
            room_id = %self.room_id,
            received = batch.len(),
            added,
            total = self.sequence.len(),
            has_more = self.loader.has_more(),
            "applied history page"
        );
        PageOutcome::Applied { changed }
    }

    /// Drop everything after a delivery gap and return the fresh backfill request.
    pub fn handle_discontinuity(&mut self) -> PageRequest {
        info!(
            room_id = %self.room_id,
            dropped = self.sequence.len(),
            "discontinuity detected; resetting timeline"
        );
        self.session += 1;
        self.sequence = MessageSequence::default();
        self.engine.reset();
        self.window.show_latest(&self.sequence);

        let kind = self.loader.restart();
        self.request(kind)
    }

    /// Follow the newest messages.
    pub fn show_latest(&mut self) {
        self.window.show_latest(&self.sequence);
    }

    /// Center the window on `serial`. Returns `false` when it is not loaded.
    pub fn show_around(&mut self, serial: &str) -> bool {
        self.window.show_around(&self.sequence, serial)
    }

    /// Render-facing snapshot.
    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            room_id: self.room_id.clone(),
            messages: self.active_window().to_vec(),
            total_messages: self.sequence.len(),
            has_more_history: self.loader.has_more(),
            loading: self.loader.is_loading(),
            anchored_serial: match self.window.anchor() {
                WindowAnchor::Latest => None,
                WindowAnchor::Around(serial) => Some(serial.clone()),
            },
        }
    }

    fn request(&mut self, kind: PageKind) -> PageRequest {
        let request = PageRequest {
            room_id: self.room_id.clone(),
            session: self.session,
            kind,
        };
        self.outstanding = Some(request.clone());
        request
    }

    fn apply(&mut self, events: &[MessageEvent], mode: ApplyMode) -> bool {
        let outcome = self.engine.apply_batch(&self.sequence, events, mode);
        if !outcome.anomalies.is_empty() {
            warn!(
                room_id = %self.room_id,
                skipped = outcome.anomalies.len(),
                "batch applied with index anomalies"
            );
        }
        if !outcome.changed {
            return false;
        }
        self.sequence = outcome.sequence;
        self.window.on_sequence_changed(&self.sequence);
        true
    }
}
