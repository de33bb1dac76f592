use std::collections::{btree_map, BTreeMap};

use chat_shared::domain::UserId;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::transport::Params;

/// Cookie carrying the authenticated account id.
pub const IDENTITY_COOKIE: &str = "c_user";
const CHANNEL_PREFIX: &str = "p_";
const SIGNATURE_SUFFIX: char = '2';
const API_VERSION_MARKER: &str = "1";

/// Exportable cookie jar contents, name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieSnapshot(BTreeMap<String, String>);

impl CookieSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `Cookie` request header (`a=1; b=2`).
    pub fn from_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self(cookies)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// The non-empty identity cookie, if present.
    pub fn identity(&self) -> Option<UserId> {
        self.get(IDENTITY_COOKIE)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::from)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// Secrets scraped from the authenticated home page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthArtifacts {
    pub csrf_token: String,
    pub revision: u64,
    pub logout_hash: Option<String>,
}

/// Authentication state of one account. Only the request signer advances `sequence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    cookies: CookieSnapshot,
    user_id: Option<UserId>,
    client_id: String,
    csrf_token: String,
    signature: String,
    revision: u64,
    logout_hash: Option<String>,
    sequence: u64,
    last_seq: String,
    channel_name: String,
    default_params: Params,
    authenticated_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            cookies: CookieSnapshot::default(),
            user_id: None,
            client_id: String::new(),
            csrf_token: String::new(),
            signature: String::new(),
            revision: 0,
            logout_hash: None,
            sequence: 1,
            last_seq: "0".into(),
            channel_name: String::new(),
            default_params: Params::new(),
            authenticated_at: None,
        }
    }
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn authenticated(
        user_id: UserId,
        client_id: String,
        artifacts: AuthArtifacts,
        cookies: CookieSnapshot,
    ) -> Self {
        let signature = derive_signature(&artifacts.csrf_token);
        let default_params: Params = [
            ("__rev", artifacts.revision.to_string()),
            ("__user", user_id.to_string()),
            ("__a", API_VERSION_MARKER.to_string()),
            ("ttstamp", signature.clone()),
            ("fb_dtsg", artifacts.csrf_token.clone()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        Self {
            cookies,
            channel_name: format!("{CHANNEL_PREFIX}{user_id}"),
            user_id: Some(user_id),
            client_id,
            csrf_token: artifacts.csrf_token,
            signature,
            revision: artifacts.revision,
            logout_hash: artifacts.logout_hash,
            default_params,
            authenticated_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() && !self.csrf_token.is_empty()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn logout_hash(&self) -> Option<&str> {
        self.logout_hash.as_deref()
    }

    /// Sequence number the next signed request will carry.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Last sequence reported by the push channel, `"0"` before the first pull.
    pub fn last_seq(&self) -> &str {
        &self.last_seq
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn default_params(&self) -> &Params {
        &self.default_params
    }

    pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
        self.authenticated_at
    }

    /// Cookies as captured when the session was established. The transport
    /// jar may rotate them later; `Listener::export_cookies` reads the live set.
    pub fn export_cookies(&self) -> CookieSnapshot {
        self.cookies.clone()
    }

    pub(crate) fn advance_sequence(&mut self) -> u64 {
        let current = self.sequence;
        self.sequence += 1;
        current
    }

    pub(crate) fn record_server_seq(&mut self, seq: String) {
        self.last_seq = seq;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Concatenated decimal character codes of the token followed by a fixed suffix digit.
pub fn derive_signature(token: &str) -> String {
    let mut signature: String = token.chars().map(|c| u32::from(c).to_string()).collect();
    signature.push(SIGNATURE_SUFFIX);
    signature
}

/// Random 31-bit client id rendered as lowercase hex.
pub fn generate_client_id() -> String {
    format!("{:x}", rand::thread_rng().gen_range(0..(1u32 << 31)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> AuthArtifacts {
        AuthArtifacts {
            csrf_token: "AQ:".into(),
            revision: 2_934_178,
            logout_hash: Some("hash".into()),
        }
    }

    #[test]
    fn signature_concatenates_char_codes() {
        assert_eq!(derive_signature("AQ:"), "6581582");
        assert_eq!(derive_signature(""), "2");
    }

    #[test]
    fn authenticated_session_populates_defaults() {
        let session = Session::authenticated(
            UserId::from("100014812758264"),
            "1a2b".into(),
            artifacts(),
            CookieSnapshot::new(),
        );

        assert!(session.is_authenticated());
        assert_eq!(session.channel_name(), "p_100014812758264");
        assert_eq!(session.sequence(), 1);
        assert_eq!(session.last_seq(), "0");
        let defaults = session.default_params();
        assert_eq!(defaults.get("__rev").map(String::as_str), Some("2934178"));
        assert_eq!(defaults.get("__user").map(String::as_str), Some("100014812758264"));
        assert_eq!(defaults.get("__a").map(String::as_str), Some("1"));
        assert_eq!(defaults.get("ttstamp").map(String::as_str), Some("6581582"));
        assert_eq!(defaults.get("fb_dtsg").map(String::as_str), Some("AQ:"));
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut session = Session::authenticated(
            UserId::from("1"),
            "ff".into(),
            artifacts(),
            CookieSnapshot::new(),
        );
        session.advance_sequence();
        session.record_server_seq("42".into());

        session.reset();
        assert_eq!(session, Session::empty());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn cookie_header_parsing_skips_blank_names() {
        let snapshot = CookieSnapshot::from_header("c_user=42; xs=abc=; =orphan; datr = d1");
        assert_eq!(snapshot.identity(), Some(UserId::from("42")));
        assert_eq!(snapshot.get("xs"), Some("abc="));
        assert_eq!(snapshot.get("datr"), Some("d1"));
        assert_eq!(snapshot.iter().count(), 3);
    }

    #[test]
    fn client_ids_are_hex() {
        let id = generate_client_id();
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
