//! Command and event plumbing between the timeline runtime and renderers.

use thiserror::Error;
use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
};

use crate::{
    config::TimelineConfig,
    types::{TimelineCommand, TimelineEvent},
};

/// Snapshot/event feed handed to each renderer.
pub type EventStream = broadcast::Receiver<TimelineEvent>;

/// Receiving end of the command queue, owned by the runtime task.
pub type CommandReceiver = mpsc::Receiver<TimelineCommand>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineChannelError {
    #[error("timeline runtime no longer accepts commands")]
    CommandChannelClosed,
    /// Only returned by [`TimelineChannels::try_send_command`].
    #[error("timeline command queue is full")]
    CommandQueueFull,
}

/// Bounded command queue into the runtime plus a fan-out event feed out of it.
#[derive(Clone, Debug)]
pub struct TimelineChannels {
    commands: mpsc::Sender<TimelineCommand>,
    events: broadcast::Sender<TimelineEvent>,
}

impl TimelineChannels {
    /// Size both channels from `config` and return the runtime's command receiver.
    pub fn open(config: &TimelineConfig) -> (Self, CommandReceiver) {
        let (commands, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        (Self { commands, events }, command_rx)
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Queue a command, waiting for capacity.
    pub async fn send_command(&self, command: TimelineCommand) -> Result<(), TimelineChannelError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TimelineChannelError::CommandChannelClosed)
    }

    /// Queue a command without waiting, for callers on a render thread.
    pub fn try_send_command(&self, command: TimelineCommand) -> Result<(), TimelineChannelError> {
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => TimelineChannelError::CommandQueueFull,
            TrySendError::Closed(_) => TimelineChannelError::CommandChannelClosed,
        })
    }

    /// Publish an event and return how many subscribers will see it.
    ///
    /// Having no subscriber is not an error; slow ones observe `Lagged`.
    pub fn emit(&self, event: TimelineEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}
