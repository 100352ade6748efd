use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Aggregate for one reaction name on a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionAggregate {
    /// Total number of reactions with this name.
    pub total: u32,
    /// Client IDs that reacted with this name.
    pub client_ids: BTreeSet<String>,
}

/// Reaction summary keyed by reaction name (usually an emoji).
pub type Reactions = BTreeMap<String, ReactionAggregate>;

/// Canonical chat message held by the timeline store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Globally unique, lexically sortable message serial.
    pub serial: String,
    /// Author client ID.
    pub client_id: String,
    /// Text body. Empty once the message is deleted.
    pub text: String,
    /// Creation timestamp in milliseconds since Unix epoch.
    pub created_at_ms: u64,
    /// Last edit/delete timestamp, when the message was ever changed.
    pub updated_at_ms: Option<u64>,
    /// Serial of the last applied create/update/delete.
    ///
    /// Equal to `serial` for a message that was never changed.
    pub version: String,
    /// Whether the message was edited.
    pub is_updated: bool,
    /// Whether the message was deleted.
    pub is_deleted: bool,
    /// Reaction summary.
    pub reactions: Reactions,
}

impl Message {
    /// Build a fresh, never-edited message.
    pub fn new(
        serial: impl Into<String>,
        client_id: impl Into<String>,
        text: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        let serial = serial.into();
        Self {
            version: serial.clone(),
            serial,
            client_id: client_id.into(),
            text: text.into(),
            created_at_ms,
            updated_at_ms: None,
            is_updated: false,
            is_deleted: false,
            reactions: Reactions::new(),
        }
    }

    /// Whether `self` sorts strictly before `other` in timeline order.
    pub fn before(&self, other: &Message) -> bool {
        self.serial < other.serial
    }

    /// Merge an occurrence for the same serial into this message.
    ///
    /// Returns `None` when the occurrence does not change anything: duplicate
    /// creates, stale or already applied versions, and identical reactions.
    pub fn merge_with(&self, occurrence: &MessageEvent) -> Option<Message> {
        let merged = match occurrence {
            MessageEvent::Created(_) => return None,
            MessageEvent::Updated(incoming) | MessageEvent::Deleted(incoming) => {
                if incoming.version <= self.version {
                    return None;
                }
                let deleted = matches!(occurrence, MessageEvent::Deleted(_));
                Message {
                    serial: self.serial.clone(),
                    client_id: self.client_id.clone(),
                    text: if deleted {
                        String::new()
                    } else {
                        incoming.text.clone()
                    },
                    created_at_ms: self.created_at_ms,
                    updated_at_ms: incoming.updated_at_ms.or(self.updated_at_ms),
                    version: incoming.version.clone(),
                    is_updated: self.is_updated || !deleted,
                    is_deleted: self.is_deleted || deleted,
                    reactions: self.reactions.clone(),
                }
            }
            MessageEvent::ReactionsUpdated(summary) => {
                if summary.reactions == self.reactions {
                    return None;
                }
                Message {
                    reactions: summary.reactions.clone(),
                    ..self.clone()
                }
            }
        };

        (merged != *self).then_some(merged)
    }
}

/// Kind of event that produced a message occurrence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageAction {
    Create,
    Update,
    Delete,
    ReactionUpdate,
}

/// Reaction summary change for one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    /// Serial of the message the reactions belong to.
    pub serial: String,
    /// Full replacement summary.
    pub reactions: Reactions,
}

/// Single message occurrence delivered by the chat SDK or a history page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageEvent {
    /// New message.
    Created(Message),
    /// Edited message snapshot.
    Updated(Message),
    /// Deleted message snapshot.
    Deleted(Message),
    /// Reaction summary for an existing message.
    ReactionsUpdated(ReactionSummary),
}

impl MessageEvent {
    /// Serial of the message this occurrence targets.
    pub fn serial(&self) -> &str {
        match self {
            Self::Created(message) | Self::Updated(message) | Self::Deleted(message) => {
                &message.serial
            }
            Self::ReactionsUpdated(summary) => &summary.serial,
        }
    }

    pub fn action(&self) -> MessageAction {
        match self {
            Self::Created(_) => MessageAction::Create,
            Self::Updated(_) => MessageAction::Update,
            Self::Deleted(_) => MessageAction::Delete,
            Self::ReactionsUpdated(_) => MessageAction::ReactionUpdate,
        }
    }

    /// Full message snapshot carried by the occurrence, if any.
    ///
    /// Reaction summaries carry no message and cannot be inserted.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Created(message) | Self::Updated(message) | Self::Deleted(message) => {
                Some(message)
            }
            Self::ReactionsUpdated(_) => None,
        }
    }
}

/// One page returned by a history query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPage {
    /// Page items, newest first.
    pub items: Vec<Message>,
    /// Whether the source reports another, older page.
    pub has_next: bool,
}

/// Render-facing view of one room timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineSnapshot {
    /// Room the snapshot belongs to.
    pub room_id: String,
    /// Messages in the active window, oldest first.
    pub messages: Vec<Message>,
    /// Total number of messages held by the store.
    pub total_messages: usize,
    /// Whether older history can still be requested.
    pub has_more_history: bool,
    /// Whether a history page is currently in flight.
    pub loading: bool,
    /// Serial the window is centered on, or `None` when following the latest messages.
    pub anchored_serial: Option<String>,
}

/// Command channel input accepted by the timeline runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineCommand {
    /// Bind the runtime to a room and start the initial backfill.
    OpenRoom {
        /// Target room ID.
        room_id: String,
    },
    /// Drop the current room and cancel in-flight history requests.
    CloseRoom,
    /// Real-time occurrences for a room.
    Ingest {
        /// Room the occurrences belong to.
        room_id: String,
        /// Occurrences in delivery order.
        events: Vec<MessageEvent>,
    },
    /// Real-time delivery had a gap for a room.
    Discontinuity {
        /// Affected room ID.
        room_id: String,
    },
    /// Request the next older history page.
    LoadMoreHistory,
    /// Center the active window on a message.
    ShowMessagesAround {
        /// Target message serial.
        serial: String,
    },
    /// Follow the latest messages again.
    ShowLatestMessages,
}

/// Event channel output emitted by the timeline runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineEvent {
    /// The visible timeline state changed.
    Snapshot(TimelineSnapshot),
    /// A history page request failed.
    HistoryLoadFailed {
        /// Room the request was for.
        room_id: String,
        /// Stable error code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Back-off requested by the source before the next attempt.
        retry_after_ms: Option<u64>,
    },
    /// A command could not be applied in the current state.
    CommandRejected {
        /// Stable error code.
        code: String,
        /// Human-readable error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reactions(name: &str, clients: &[&str]) -> Reactions {
        let mut out = Reactions::new();
        out.insert(
            name.to_owned(),
            ReactionAggregate {
                total: clients.len() as u32,
                client_ids: clients.iter().map(|c| (*c).to_owned()).collect(),
            },
        );
        out
    }

    fn edited(base: &Message, version: &str, text: &str) -> Message {
        Message {
            text: text.to_owned(),
            version: version.to_owned(),
            updated_at_ms: Some(base.created_at_ms + 10),
            is_updated: true,
            ..base.clone()
        }
    }

    #[test]
    fn orders_by_serial_lexically() {
        let a = Message::new("01a", "alice", "one", 1);
        let b = Message::new("01b", "bob", "two", 0);
        assert!(a.before(&b));
        assert!(!b.before(&a));
        assert!(!a.before(&a));
    }

    #[test]
    fn duplicate_create_does_not_merge() {
        let message = Message::new("01a", "alice", "hi", 1);
        assert_eq!(message.merge_with(&MessageEvent::Created(message.clone())), None);
    }

    #[test]
    fn newer_update_replaces_text_and_keeps_reactions() {
        let mut message = Message::new("01a", "alice", "hi", 1);
        message.reactions = reactions("👍", &["bob"]);

        let merged = message
            .merge_with(&MessageEvent::Updated(edited(&message, "01c", "hello")))
            .expect("newer update should merge");

        assert_eq!(merged.text, "hello");
        assert_eq!(merged.version, "01c");
        assert!(merged.is_updated);
        assert!(!merged.is_deleted);
        assert_eq!(merged.reactions, message.reactions);
        assert_eq!(merged.updated_at_ms, Some(11));
    }

    #[test]
    fn stale_or_repeated_update_is_ignored() {
        let message = Message::new("01a", "alice", "hi", 1);
        let current = message
            .merge_with(&MessageEvent::Updated(edited(&message, "01d", "latest")))
            .expect("update should merge");

        let stale = edited(&message, "01c", "older edit");
        assert_eq!(current.merge_with(&MessageEvent::Updated(stale)), None);
        assert_eq!(
            current.merge_with(&MessageEvent::Updated(current.clone())),
            None
        );
    }

    #[test]
    fn delete_clears_text_and_flags_message() {
        let message = Message::new("01a", "alice", "hi", 1);
        let merged = message
            .merge_with(&MessageEvent::Deleted(edited(&message, "01b", "hi")))
            .expect("delete should merge");

        assert!(merged.is_deleted);
        assert!(merged.text.is_empty());
        assert_eq!(merged.version, "01b");
    }

    #[test]
    fn reaction_summary_merges_only_when_different() {
        let message = Message::new("01a", "alice", "hi", 1);
        let summary = ReactionSummary {
            serial: "01a".into(),
            reactions: reactions("🎉", &["bob", "carol"]),
        };

        let merged = message
            .merge_with(&MessageEvent::ReactionsUpdated(summary.clone()))
            .expect("new reactions should merge");
        assert_eq!(merged.reactions["🎉"].total, 2);
        assert_eq!(merged.text, "hi");

        assert_eq!(
            merged.merge_with(&MessageEvent::ReactionsUpdated(summary)),
            None
        );
    }

    #[test]
    fn occurrence_accessors_report_serial_and_action() {
        let message = Message::new("01a", "alice", "hi", 1);
        let event = MessageEvent::Deleted(message.clone());
        assert_eq!(event.serial(), "01a");
        assert_eq!(event.action(), MessageAction::Delete);
        assert_eq!(event.message(), Some(&message));

        let reaction = MessageEvent::ReactionsUpdated(ReactionSummary {
            serial: "01z".into(),
            reactions: Reactions::new(),
        });
        assert_eq!(reaction.serial(), "01z");
        assert_eq!(reaction.action(), MessageAction::ReactionUpdate);
        assert_eq!(reaction.message(), None);
    }
}
