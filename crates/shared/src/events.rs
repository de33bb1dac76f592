//! Typed events produced from push-channel envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{MessageId, ThreadId, ThreadKind, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceived {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub body: String,
    pub thread_id: ThreadId,
    pub thread_kind: ThreadKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorChanged {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub new_color: String,
    pub thread_id: ThreadId,
    pub thread_kind: ThreadKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmojiChanged {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub new_emoji: String,
    pub thread_id: ThreadId,
    pub thread_kind: ThreadKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleChanged {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub new_title: String,
    pub thread_id: ThreadId,
    pub thread_kind: ThreadKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicknameChanged {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub changed_for: UserId,
    pub new_nickname: String,
    pub thread_id: ThreadId,
    pub thread_kind: ThreadKind,
    pub timestamp: i64,
}

/// Participants joined a thread. `added_user_ids` keeps server order, duplicates included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantsAdded {
    pub message_id: MessageId,
    pub added_user_ids: Vec<UserId>,
    pub author_id: UserId,
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRemoved {
    pub message_id: MessageId,
    pub removed_user_id: UserId,
    pub author_id: UserId,
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxStatus {
    pub unseen_count: u64,
    pub unread_count: u64,
    pub recent_unread_count: u64,
}

/// An entry the classifier could not map to a typed event, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownEvent {
    pub raw: Value,
}

macro_rules! impl_sent_at {
    ($($name:ident),+ $(,)?) => {
        $(
            impl $name {
                /// Server timestamp (milliseconds since the epoch) as a UTC instant.
                pub fn sent_at(&self) -> Option<DateTime<Utc>> {
                    DateTime::from_timestamp_millis(self.timestamp)
                }
            }
        )+
    };
}

impl_sent_at!(
    MessageReceived,
    ColorChanged,
    EmojiChanged,
    TitleChanged,
    NicknameChanged,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    MessageReceived(MessageReceived),
    ColorChanged(ColorChanged),
    EmojiChanged(EmojiChanged),
    TitleChanged(TitleChanged),
    NicknameChanged(NicknameChanged),
    ParticipantsAdded(ParticipantsAdded),
    ParticipantRemoved(ParticipantRemoved),
    InboxStatus(InboxStatus),
    Unknown(UnknownEvent),
}

/// Discriminant of [`DomainEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageReceived,
    ColorChanged,
    EmojiChanged,
    TitleChanged,
    NicknameChanged,
    ParticipantsAdded,
    ParticipantRemoved,
    InboxStatus,
    Unknown,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::MessageReceived,
        EventKind::ColorChanged,
        EventKind::EmojiChanged,
        EventKind::TitleChanged,
        EventKind::NicknameChanged,
        EventKind::ParticipantsAdded,
        EventKind::ParticipantRemoved,
        EventKind::InboxStatus,
        EventKind::Unknown,
    ];
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::MessageReceived(_) => EventKind::MessageReceived,
            DomainEvent::ColorChanged(_) => EventKind::ColorChanged,
            DomainEvent::EmojiChanged(_) => EventKind::EmojiChanged,
            DomainEvent::TitleChanged(_) => EventKind::TitleChanged,
            DomainEvent::NicknameChanged(_) => EventKind::NicknameChanged,
            DomainEvent::ParticipantsAdded(_) => EventKind::ParticipantsAdded,
            DomainEvent::ParticipantRemoved(_) => EventKind::ParticipantRemoved,
            DomainEvent::InboxStatus(_) => EventKind::InboxStatus,
            DomainEvent::Unknown(_) => EventKind::Unknown,
        }
    }
}
