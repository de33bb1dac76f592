use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use rand::seq::SliceRandom;
use serde::Deserialize;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_4) AppleWebKit/603.1.30 (KHTML, like Gecko) Version/10.1 Safari/603.1.30",
    "Mozilla/5.0 (X11; Linux x86_64; rv:53.0) Gecko/20100101 Firefox/53.0",
    "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko",
];

/// URLs of the remote service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub mobile_home: String,
    pub base: String,
    pub checkpoint: String,
    pub save_device: String,
    pub pull: String,
    pub ping: String,
    pub logout: String,
    /// Domain attribute for imported cookies; empty means host-only for `base`.
    pub cookie_domain: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "https://m.facebook.com/login.php?login_attempt=1".into(),
            mobile_home: "https://m.facebook.com/".into(),
            base: "https://www.facebook.com".into(),
            checkpoint: "https://m.facebook.com/login/checkpoint/".into(),
            save_device: "https://m.facebook.com/login/save-device/cancel/".into(),
            pull: "https://0-edge-chat.facebook.com/pull".into(),
            ping: "https://0-channel-proxy-06-ash2.facebook.com/active_ping".into(),
            logout: "https://www.facebook.com/logout.php".into(),
            cookie_domain: ".facebook.com".into(),
        }
    }
}

impl Endpoints {
    /// Every endpoint rooted at `base_url`, for local servers and tests.
    pub fn local(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login: format!("{base}/login.php?login_attempt=1"),
            mobile_home: format!("{base}/"),
            base: base.to_string(),
            checkpoint: format!("{base}/login/checkpoint/"),
            save_device: format!("{base}/login/save-device/cancel/"),
            pull: format!("{base}/pull"),
            ping: format!("{base}/active_ping"),
            logout: format!("{base}/logout.php"),
            cookie_domain: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub user_agent: Option<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub mark_alive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            user_agent: None,
            max_retries: 5,
            retry_delay_ms: 1_000,
            request_timeout_secs: 30,
            mark_alive: true,
        }
    }
}

impl ClientConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured user agent, or one picked from the built-in list.
    pub fn resolve_user_agent(&self) -> String {
        if let Some(agent) = self.user_agent.as_ref().filter(|agent| !agent.trim().is_empty()) {
            return agent.clone();
        }
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string()
    }
}

/// Loads the TOML file at `path` when it exists, then applies `CHAT_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            toml::from_str::<ClientConfig>(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?
        }
        _ => ClientConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_USER_AGENT") {
        config.user_agent = Some(v);
    }
    if let Some(v) = lookup("CHAT_MAX_RETRIES").and_then(|v| v.parse().ok()) {
        config.max_retries = v;
    }
    if let Some(v) = lookup("CHAT_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.retry_delay_ms = v;
    }
    if let Some(v) = lookup("CHAT_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.request_timeout_secs = v;
    }
    if let Some(v) = lookup("CHAT_MARK_ALIVE").and_then(|v| v.parse().ok()) {
        config.mark_alive = v;
    }
    if let Some(v) = lookup("CHAT_BASE_URL") {
        config.endpoints = Endpoints::local(&v);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            max_retries = 2

            [endpoints]
            pull = "https://edge.example/pull"
            "#,
        )
        .expect("parse");

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.endpoints.pull, "https://edge.example/pull");
        assert_eq!(config.endpoints.logout, Endpoints::default().logout);
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("CHAT_MAX_RETRIES", "9"),
            ("CHAT_REQUEST_TIMEOUT_SECS", "not-a-number"),
            ("CHAT_MARK_ALIVE", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_retries, 9);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.mark_alive);
    }

    #[test]
    fn loads_file_from_disk() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("chat_client_config_{suffix}.toml"));
        fs::write(&path, "retry_delay_ms = 5\nuser_agent = \"listener-test/1.0\"\n").expect("write");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.retry_delay(), Duration::from_millis(5));

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/chat-client.toml"))).expect("load");
        assert_eq!(config.retry_delay_ms, ClientConfig::default().retry_delay_ms);
    }

    #[test]
    fn configured_user_agent_is_used_verbatim() {
        let config = ClientConfig {
            user_agent: Some("listener-test/1.0".into()),
            ..ClientConfig::default()
        };
        assert_eq!(config.resolve_user_agent(), "listener-test/1.0");
        assert!(USER_AGENTS.contains(&ClientConfig::default().resolve_user_agent().as_str()));
    }
}
