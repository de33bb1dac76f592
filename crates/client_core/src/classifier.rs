//! Turns raw envelope entries into [`DomainEvent`]s.
//!
//! Entries are handled one at a time and in order. An entry whose thread
//! reference cannot be resolved (including a membership change without a
//! group key), or whose top-level kind is not known, becomes
//! [`DomainEvent::Unknown`]. An entry missing any other field it
//! needs is logged and skipped; its siblings are still classified.

use chat_shared::{
    domain::{MessageId, ThreadKind, ThreadRef, UserId},
    events::{
        ColorChanged, DomainEvent, EmojiChanged, InboxStatus, MessageReceived, NicknameChanged,
        ParticipantRemoved, ParticipantsAdded, TitleChanged, UnknownEvent,
    },
    protocol::{DeltaPayload, EntryKind, FlexId, InboxCounters, RawEnvelope},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClassificationFault::{self, Malformed, MissingField, UnresolvedThread};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaClassifier;

/// Who did what, where and when: the metadata every thread delta carries.
struct Origin {
    message_id: MessageId,
    author_id: UserId,
    timestamp: i64,
    thread: ThreadRef,
}

impl DeltaClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, envelope: &RawEnvelope) -> Vec<DomainEvent> {
        let mut events = Vec::with_capacity(envelope.len());
        for (index, entry) in envelope.entries.iter().enumerate() {
            match self.classify_entry(entry) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(UnresolvedThread) => {
                    debug!("classifier: entry index={index} has no usable thread key; keeping as unknown");
                    events.push(unknown(entry));
                }
                Err(fault) => {
                    warn!("classifier: skipping entry index={index}: {fault}");
                    debug!("classifier: skipped entry index={index} raw={entry}");
                }
            }
        }
        events
    }

    /// `Ok(None)` for entry kinds that carry nothing for subscribers.
    pub fn classify_entry(&self, entry: &Value) -> Result<Option<DomainEvent>, ClassificationFault> {
        match EntryKind::of(entry) {
            EntryKind::Delta => classify_delta(entry).map(Some),
            EntryKind::Inbox => Ok(Some(classify_inbox(entry))),
            EntryKind::QPrimer | EntryKind::DeltaFlow => Ok(None),
            EntryKind::Other(kind) => {
                debug!("classifier: unknown entry kind={kind}");
                Ok(Some(unknown(entry)))
            }
            EntryKind::Missing => Ok(Some(unknown(entry))),
        }
    }
}

fn unknown(entry: &Value) -> DomainEvent {
    DomainEvent::Unknown(UnknownEvent { raw: entry.clone() })
}

fn classify_inbox(entry: &Value) -> DomainEvent {
    let counters = serde_json::from_value::<InboxCounters>(entry.clone()).ok();
    match counters {
        Some(InboxCounters {
            unseen: Some(unseen_count),
            unread: Some(unread_count),
            recent_unread: Some(recent_unread_count),
        }) => DomainEvent::InboxStatus(InboxStatus {
            unseen_count,
            unread_count,
            recent_unread_count,
        }),
        _ => {
            debug!("classifier: inbox entry without full counters; keeping as unknown");
            unknown(entry)
        }
    }
}

fn required(value: Option<&FlexId>, field: &'static str) -> Result<String, ClassificationFault> {
    value
        .cloned()
        .map(FlexId::into_string)
        .ok_or(MissingField(field))
}

fn untyped(delta: &DeltaPayload, key: &'static str) -> Result<String, ClassificationFault> {
    delta.untyped(key).ok_or(MissingField(key))
}

fn origin(delta: &DeltaPayload) -> Result<Origin, ClassificationFault> {
    let metadata = delta
        .message_metadata
        .as_ref()
        .ok_or(MissingField("messageMetadata"))?;

    let message_id = required(metadata.message_id.as_ref(), "messageId")?;
    let author_id = required(metadata.actor_fb_id.as_ref(), "actorFbId")?;
    let timestamp = metadata
        .timestamp
        .as_ref()
        .ok_or(MissingField("timestamp"))?
        .as_i64()
        .ok_or_else(|| Malformed("timestamp is not an integer".into()))?;
    let thread = metadata
        .thread_key
        .as_ref()
        .and_then(|key| key.resolve())
        .ok_or(UnresolvedThread)?;

    Ok(Origin {
        message_id: MessageId(message_id),
        author_id: UserId(author_id),
        timestamp,
        thread,
    })
}

/// Membership changes only exist in group threads; a peer-user key does not resolve them.
fn group_origin(delta: &DeltaPayload) -> Result<Origin, ClassificationFault> {
    let origin = origin(delta)?;
    match origin.thread.kind {
        ThreadKind::Group => Ok(origin),
        ThreadKind::User => Err(UnresolvedThread),
    }
}

/// Branches are tried in a fixed order and the first match wins, even when
/// a later branch's marker is also present.
fn classify_delta(entry: &Value) -> Result<DomainEvent, ClassificationFault> {
    let raw = entry.get("delta").ok_or(MissingField("delta"))?;
    let delta: DeltaPayload =
        serde_json::from_value(raw.clone()).map_err(|err| Malformed(err.to_string()))?;

    if let Some(added) = &delta.added_participants {
        let added_user_ids = added
            .iter()
            .map(|participant| required(participant.user_fb_id.as_ref(), "userFbId").map(UserId))
            .collect::<Result<Vec<_>, _>>()?;
        let origin = group_origin(&delta)?;
        return Ok(DomainEvent::ParticipantsAdded(ParticipantsAdded {
            message_id: origin.message_id,
            added_user_ids,
            author_id: origin.author_id,
            thread_id: origin.thread.thread_id,
        }));
    }

    if let Some(left) = &delta.left_participant_fb_id {
        let origin = group_origin(&delta)?;
        return Ok(DomainEvent::ParticipantRemoved(ParticipantRemoved {
            message_id: origin.message_id,
            removed_user_id: UserId(left.clone().into_string()),
            author_id: origin.author_id,
            thread_id: origin.thread.thread_id,
        }));
    }

    if delta.is_type(DeltaPayload::THEME_CHANGE) {
        let new_color = untyped(&delta, "theme_color")?;
        let origin = origin(&delta)?;
        return Ok(DomainEvent::ColorChanged(ColorChanged {
            message_id: origin.message_id,
            author_id: origin.author_id,
            new_color,
            thread_id: origin.thread.thread_id,
            thread_kind: origin.thread.kind,
            timestamp: origin.timestamp,
        }));
    }

    if delta.is_type(DeltaPayload::ICON_CHANGE) {
        let new_emoji = untyped(&delta, "thread_icon")?;
        let origin = origin(&delta)?;
        return Ok(DomainEvent::EmojiChanged(EmojiChanged {
            message_id: origin.message_id,
            author_id: origin.author_id,
            new_emoji,
            thread_id: origin.thread.thread_id,
            thread_kind: origin.thread.kind,
            timestamp: origin.timestamp,
        }));
    }

    if delta.is_class(DeltaPayload::THREAD_NAME_CLASS) {
        let new_title = delta.name.clone().ok_or(MissingField("name"))?;
        let origin = origin(&delta)?;
        return Ok(DomainEvent::TitleChanged(TitleChanged {
            message_id: origin.message_id,
            author_id: origin.author_id,
            new_title,
            thread_id: origin.thread.thread_id,
            thread_kind: origin.thread.kind,
            timestamp: origin.timestamp,
        }));
    }

    if delta.is_type(DeltaPayload::NICKNAME_CHANGE) {
        let changed_for = untyped(&delta, "participant_id")?;
        let new_nickname = untyped(&delta, "nickname")?;
        let origin = origin(&delta)?;
        return Ok(DomainEvent::NicknameChanged(NicknameChanged {
            message_id: origin.message_id,
            author_id: origin.author_id,
            changed_for: UserId(changed_for),
            new_nickname,
            thread_id: origin.thread.thread_id,
            thread_kind: origin.thread.kind,
            timestamp: origin.timestamp,
        }));
    }

    if delta.is_class(DeltaPayload::NEW_MESSAGE_CLASS) {
        let origin = origin(&delta)?;
        return Ok(DomainEvent::MessageReceived(MessageReceived {
            message_id: origin.message_id,
            author_id: origin.author_id,
            body: delta.body.clone().unwrap_or_default(),
            thread_id: origin.thread.thread_id,
            thread_kind: origin.thread.kind,
            timestamp: origin.timestamp,
        }));
    }

    Ok(unknown(entry))
}

#[cfg(test)]
#[path = "tests/classifier_tests.rs"]
mod tests;
