//! Wire shapes of the push channel.
//!
//! The service emits loosely typed JSON. Every field that the classifier
//! reads is optional here so that a missing field surfaces as a
//! classification decision instead of a decode failure for the whole body.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{ThreadId, ThreadRef},
    error::WireError,
};

/// Anti-hijacking prefix the service puts in front of JSON bodies.
pub const JSON_GUARD_PREFIX: &str = "for (;;);";

pub fn strip_json_guard(body: &str) -> &str {
    let trimmed = body.trim_start();
    trimmed.strip_prefix(JSON_GUARD_PREFIX).unwrap_or(trimmed)
}

pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, WireError> {
    Ok(serde_json::from_str(strip_json_guard(body))?)
}

/// Reads an optional field, treating a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Identifier that the service sends either as a JSON string or a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexId {
    Text(String),
    Number(serde_json::Number),
}

impl FlexId {
    pub fn into_string(self) -> String {
        match self {
            FlexId::Text(text) => text,
            FlexId::Number(number) => number.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlexId::Text(text) => text.trim().parse().ok(),
            FlexId::Number(number) => number.as_i64(),
        }
    }
}

/// Load-balancer metadata: the sticky token and pool id of a channel instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LbInfo {
    #[serde(default)]
    pub sticky: Option<FlexId>,
    #[serde(default)]
    pub pool: Option<FlexId>,
}

impl LbInfo {
    /// Both tokens as strings, or `None` when either is missing.
    pub fn tokens(&self) -> Option<(String, String)> {
        let sticky = self.sticky.clone()?.into_string();
        let pool = self.pool.clone()?.into_string();
        Some((sticky, pool))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub lb_info: Option<LbInfo>,
}

/// Body of a pull call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullResponse {
    #[serde(default, rename = "t")]
    pub response_type: Option<String>,
    #[serde(default)]
    pub seq: Option<FlexId>,
    #[serde(default)]
    pub ms: Option<Vec<Value>>,
    #[serde(default)]
    pub lb_info: Option<LbInfo>,
}

impl PullResponse {
    pub const REFRESH: &'static str = "refresh";

    /// The server asks the client to re-handshake the channel.
    pub fn requests_refresh(&self) -> bool {
        self.response_type.as_deref() == Some(Self::REFRESH)
    }

    pub fn next_seq(&self) -> Option<String> {
        self.seq.clone().map(FlexId::into_string)
    }

    /// Entries of this response; no `ms` array means no data.
    pub fn into_envelope(self) -> RawEnvelope {
        RawEnvelope {
            entries: self.ms.unwrap_or_default(),
        }
    }
}

/// One server response to a single pull call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub entries: Vec<Value>,
}

impl RawEnvelope {
    pub fn new(entries: Vec<Value>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Top-level discriminator of an envelope entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Delta,
    Inbox,
    QPrimer,
    DeltaFlow,
    Other(String),
    Missing,
}

impl EntryKind {
    pub fn of(entry: &Value) -> Self {
        match entry.get("type").and_then(Value::as_str) {
            Some("delta") => EntryKind::Delta,
            Some("inbox") => EntryKind::Inbox,
            Some("qprimer") => EntryKind::QPrimer,
            Some("deltaflow") => EntryKind::DeltaFlow,
            Some(other) => EntryKind::Other(other.to_string()),
            None => EntryKind::Missing,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadKey {
    #[serde(default, deserialize_with = "lenient")]
    pub thread_fb_id: Option<FlexId>,
    #[serde(default, deserialize_with = "lenient")]
    pub other_user_fb_id: Option<FlexId>,
}

impl ThreadKey {
    /// A group key wins over a peer-user key when both are present.
    pub fn resolve(&self) -> Option<ThreadRef> {
        if let Some(group) = &self.thread_fb_id {
            return Some(ThreadRef::group(ThreadId(group.clone().into_string())));
        }
        self.other_user_fb_id
            .as_ref()
            .map(|peer| ThreadRef::user(ThreadId(peer.clone().into_string())))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub message_id: Option<FlexId>,
    #[serde(default, deserialize_with = "lenient")]
    pub actor_fb_id: Option<FlexId>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<FlexId>,
    #[serde(default, deserialize_with = "lenient")]
    pub thread_key: Option<ThreadKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedParticipant {
    #[serde(default)]
    pub user_fb_id: Option<FlexId>,
}

/// The `delta` object of a `delta` entry.
///
/// The branch markers (`addedParticipants`, `leftParticipantFbId`) decode
/// strictly; every other field reads as absent when its shape is unexpected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    pub delta_type: Option<String>,
    #[serde(default, rename = "class", deserialize_with = "lenient")]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message_metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub added_participants: Option<Vec<AddedParticipant>>,
    #[serde(default)]
    pub left_participant_fb_id: Option<FlexId>,
    #[serde(default, deserialize_with = "lenient")]
    pub untyped_data: Option<HashMap<String, Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub body: Option<String>,
}

impl DeltaPayload {
    pub const THEME_CHANGE: &'static str = "change_thread_theme";
    pub const ICON_CHANGE: &'static str = "change_thread_icon";
    pub const NICKNAME_CHANGE: &'static str = "change_thread_nickname";
    pub const THREAD_NAME_CLASS: &'static str = "ThreadName";
    pub const NEW_MESSAGE_CLASS: &'static str = "NewMessage";

    pub fn is_type(&self, delta_type: &str) -> bool {
        self.delta_type.as_deref() == Some(delta_type)
    }

    pub fn is_class(&self, class: &str) -> bool {
        self.class.as_deref() == Some(class)
    }

    /// A string-or-number value from `untypedData`.
    pub fn untyped(&self, key: &str) -> Option<String> {
        match self.untyped_data.as_ref()?.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

/// Counters of an `inbox` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboxCounters {
    #[serde(default)]
    pub unseen: Option<u64>,
    #[serde(default)]
    pub unread: Option<u64>,
    #[serde(default)]
    pub recent_unread: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::ThreadKind;

    #[test]
    fn strips_guard_prefix_before_decoding() {
        let body = r#"for (;;); {"t":"msg","seq":12,"ms":[{"type":"qprimer"}]}"#;
        let response: PullResponse = decode_body(body).expect("decode");
        assert_eq!(response.next_seq().as_deref(), Some("12"));
        assert_eq!(response.into_envelope().len(), 1);
    }

    #[test]
    fn pull_without_entries_is_an_empty_envelope() {
        let response: PullResponse = decode_body(r#"{"t":"heartbeat"}"#).expect("decode");
        assert!(response.next_seq().is_none());
        assert!(response.into_envelope().is_empty());
    }

    #[test]
    fn handshake_tokens_require_both_fields() {
        let full: HandshakeResponse =
            decode_body(r#"{"lb_info":{"sticky":"abc","pool":"atn2c06_chat-proxy"}}"#)
                .expect("decode");
        assert_eq!(
            full.lb_info.and_then(|lb| lb.tokens()),
            Some(("abc".to_string(), "atn2c06_chat-proxy".to_string()))
        );

        let partial: HandshakeResponse =
            decode_body(r#"{"lb_info":{"sticky":123}}"#).expect("decode");
        assert!(partial.lb_info.and_then(|lb| lb.tokens()).is_none());
    }

    #[test]
    fn thread_key_prefers_group_then_peer() {
        let group: ThreadKey =
            serde_json::from_value(json!({"threadFbId": 77, "otherUserFbId": "5"})).expect("key");
        let resolved = group.resolve().expect("group");
        assert_eq!(resolved.kind, ThreadKind::Group);
        assert_eq!(resolved.thread_id.as_str(), "77");

        let peer: ThreadKey = serde_json::from_value(json!({"otherUserFbId": "5"})).expect("key");
        assert_eq!(peer.resolve().expect("peer").kind, ThreadKind::User);

        let empty: ThreadKey = serde_json::from_value(json!({})).expect("key");
        assert!(empty.resolve().is_none());
    }

    #[test]
    fn mistyped_optional_fields_read_as_absent() {
        let delta: DeltaPayload = serde_json::from_value(json!({
            "class": "NewMessage",
            "name": 5,
            "untypedData": "oops",
            "messageMetadata": {"messageId": "mid.1", "timestamp": [], "threadKey": {"threadFbId": {}}}
        }))
        .expect("decode");

        assert!(delta.is_class(DeltaPayload::NEW_MESSAGE_CLASS));
        assert!(delta.name.is_none());
        assert!(delta.untyped_data.is_none());
        let metadata = delta.message_metadata.expect("metadata");
        assert_eq!(metadata.message_id, Some(FlexId::Text("mid.1".into())));
        assert!(metadata.timestamp.is_none());
        assert!(metadata.thread_key.expect("key").resolve().is_none());

        let strict = serde_json::from_value::<DeltaPayload>(json!({"addedParticipants": "x"}));
        assert!(strict.is_err());
    }

    #[test]
    fn entry_kind_reads_type_discriminator() {
        assert_eq!(EntryKind::of(&json!({"type": "delta"})), EntryKind::Delta);
        assert_eq!(
            EntryKind::of(&json!({"type": "typ"})),
            EntryKind::Other("typ".into())
        );
        assert_eq!(EntryKind::of(&json!({"st": 1})), EntryKind::Missing);
    }
}
