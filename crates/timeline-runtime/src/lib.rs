//! Async runtime owning one room timeline at a time.
//!
//! Commands arrive on the channel from [`TimelineRuntimeHandle`]; history pages
//! are fetched on spawned tasks and fed back through an internal channel, so
//! real-time occurrences keep flowing while a page is in flight. All store
//! mutation happens on the runtime task.

use std::sync::Arc;

use timeline_core::{
    CommandReceiver, EventStream, HistoryPage, PageOutcome, PageRequest, RoomTimeline,
    TimelineChannelError, TimelineChannels, TimelineCommand, TimelineConfig, TimelineError,
    TimelineEvent,
};
use timeline_source::{HistorySource, fetch_page};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMPLETION_BUFFER: usize = 16;

#[derive(Clone, Debug)]
pub struct TimelineRuntimeHandle {
    channels: TimelineChannels,
}

impl TimelineRuntimeHandle {
    pub async fn send(&self, command: TimelineCommand) -> Result<(), TimelineChannelError> {
        self.channels.send_command(command).await
    }

    /// Non-blocking [`Self::send`]; fails with `CommandQueueFull` instead of waiting.
    pub fn try_send(&self, command: TimelineCommand) -> Result<(), TimelineChannelError> {
        self.channels.try_send_command(command)
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn the runtime task on the current tokio runtime.
pub fn spawn_runtime(
    source: Arc<dyn HistorySource>,
    config: TimelineConfig,
) -> TimelineRuntimeHandle {
    let (channels, command_rx) = TimelineChannels::open(&config);
    let runtime = TimelineRuntime::new(channels.clone(), command_rx, source, config);
    tokio::spawn(async move {
        runtime.run().await;
    });

    TimelineRuntimeHandle { channels }
}

#[derive(Debug)]
struct PageCompletion {
    request: PageRequest,
    result: Result<HistoryPage, TimelineError>,
}

#[derive(Debug)]
struct RoomSession {
    timeline: RoomTimeline,
    stop: CancellationToken,
}

impl RoomSession {
    fn new(timeline: RoomTimeline) -> Self {
        Self {
            timeline,
            stop: CancellationToken::new(),
        }
    }

    /// Cancel every fetch issued so far and start a fresh token.
    fn renew_token(&mut self) {
        self.stop.cancel();
        self.stop = CancellationToken::new();
    }
}

struct TimelineRuntime {
    channels: TimelineChannels,
    command_rx: CommandReceiver,
    completion_tx: mpsc::Sender<PageCompletion>,
    completion_rx: mpsc::Receiver<PageCompletion>,
    source: Arc<dyn HistorySource>,
    config: TimelineConfig,
    room: Option<RoomSession>,
    /// Session handed to the next opened room; above every session used so far.
    next_session: u64,
}

impl TimelineRuntime {
    fn new(
        channels: TimelineChannels,
        command_rx: CommandReceiver,
        source: Arc<dyn HistorySource>,
        config: TimelineConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_BUFFER);
        Self {
            channels,
            command_rx,
            completion_tx,
            completion_rx,
            source,
            config,
            room: None,
            next_session: 0,
        }
    }

    async fn run(mut self) {
        debug!("timeline runtime started");
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if let Err(err) = self.handle_command(command) {
                        self.channels.emit(TimelineEvent::CommandRejected {
                            code: err.code,
                            message: err.message,
                        });
                    }
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
        }

        if let Some(room) = self.room.take() {
            room.stop.cancel();
        }
        debug!("timeline runtime exiting");
    }

    fn handle_command(&mut self, command: TimelineCommand) -> Result<(), TimelineError> {
        match command {
            TimelineCommand::OpenRoom { room_id } => {
                self.handle_open_room(room_id);
                Ok(())
            }
            TimelineCommand::CloseRoom => {
                self.handle_close_room();
                Ok(())
            }
            TimelineCommand::Ingest { room_id, events } => {
                let room = self.require_room("ingest")?;
                if room.timeline.room_id() != room_id {
                    debug!(%room_id, "ignoring occurrences for a room that is not open");
                    return Ok(());
                }
                if room.timeline.apply_events(&events) {
                    self.emit_snapshot();
                }
                Ok(())
            }
            TimelineCommand::Discontinuity { room_id } => self.handle_discontinuity(room_id),
            TimelineCommand::LoadMoreHistory => self.handle_load_more(),
            TimelineCommand::ShowMessagesAround { serial } => {
                let room = self.require_room("show_messages_around")?;
                if !room.timeline.show_around(&serial) {
                    return Err(TimelineError::message_not_loaded(&serial));
                }
                self.emit_snapshot();
                Ok(())
            }
            TimelineCommand::ShowLatestMessages => {
                self.require_room("show_latest_messages")?
                    .timeline
                    .show_latest();
                self.emit_snapshot();
                Ok(())
            }
        }
    }

    fn handle_open_room(&mut self, room_id: String) {
        self.handle_close_room();
        info!(%room_id, "opening room timeline");

        let timeline = RoomTimeline::new(room_id, self.next_session, &self.config);
        let mut session = RoomSession::new(timeline);
        let request = session.timeline.begin_initial_backfill();
        self.room = Some(session);

        if let Some(request) = request {
            self.spawn_fetch(request);
        }
        self.emit_snapshot();
    }

    fn handle_close_room(&mut self) {
        if let Some(room) = self.room.take() {
            info!(room_id = %room.timeline.room_id(), "closing room timeline");
            room.stop.cancel();
            self.next_session = room.timeline.session() + 1;
        }
    }

    fn handle_discontinuity(&mut self, room_id: String) -> Result<(), TimelineError> {
        let room = self.require_room("discontinuity")?;
        if room.timeline.room_id() != room_id {
            debug!(%room_id, "ignoring discontinuity for a room that is not open");
            return Ok(());
        }

        room.renew_token();
        let request = room.timeline.handle_discontinuity();
        self.spawn_fetch(request);
        self.emit_snapshot();
        Ok(())
    }

    fn handle_load_more(&mut self) -> Result<(), TimelineError> {
        let room = self.require_room("load_more_history")?;
        let Some(request) = room.timeline.begin_load_more() else {
            debug!(
                room_id = %room.timeline.room_id(),
                loading = room.timeline.is_loading(),
                has_more = room.timeline.has_more_history(),
                "load more ignored"
            );
            return Ok(());
        };

        self.spawn_fetch(request);
        self.emit_snapshot();
        Ok(())
    }

    fn handle_completion(&mut self, completion: PageCompletion) {
        let Some(room) = self.room.as_mut() else {
            debug!(room_id = %completion.request.room_id, "dropping page for closed room");
            return;
        };

        match room
            .timeline
            .complete_page(&completion.request, completion.result)
        {
            PageOutcome::Applied { .. } => self.emit_snapshot(),
            PageOutcome::Stale => {}
            PageOutcome::Failed(err) => {
                debug!(
                    code = %err.code,
                    transient = err.is_transient(),
                    retry_after = ?err.retry_after(),
                    "reporting history load failure"
                );
                self.channels.emit(TimelineEvent::HistoryLoadFailed {
                    room_id: completion.request.room_id,
                    code: err.code,
                    message: err.message,
                    retry_after_ms: err.retry_after_ms,
                });
                self.emit_snapshot();
            }
        }
    }

    fn spawn_fetch(&self, request: PageRequest) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        let stop = room.stop.child_token();
        let source = Arc::clone(&self.source);
        let completion_tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = stop.cancelled() => {
                    debug!(room_id = %request.room_id, session = request.session, "history fetch cancelled");
                    return;
                }
                result = fetch_page(source.as_ref(), &request) => result,
            };
            if completion_tx
                .send(PageCompletion { request, result })
                .await
                .is_err()
            {
                warn!("timeline runtime stopped before page completion was delivered");
            }
        });
    }

    fn emit_snapshot(&self) {
        if let Some(room) = &self.room {
            self.channels
                .emit(TimelineEvent::Snapshot(room.timeline.snapshot()));
        }
    }

    fn require_room(&mut self, action: &str) -> Result<&mut RoomSession, TimelineError> {
        self.room
            .as_mut()
            .ok_or_else(|| TimelineError::no_open_room(action))
    }
}
