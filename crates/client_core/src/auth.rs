//! Login state machine.
//!
//! Every transition is decided by the final URL (and for the checkpoint, the
//! body) of the previous response. A run records the states it passed
//! through so embedders can tell how a login went.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::{AuthError, TransportError},
    scrape,
    session::{generate_client_id, AuthArtifacts, CookieSnapshot, Session, IDENTITY_COOKIE},
    signer::RequestSigner,
    transport::{HttpResponse, HttpTransport, Params},
};

const HOME_MARKER: &str = "home";
const CHECKPOINT_MARKER: &str = "checkpoint";
const SAVE_DEVICE_MARKER: &str = "save-device";
const SECURITY_CODE_PROMPT: &str = "Enter Security Code to Continue";
const CSRF_INPUT: &str = "fb_dtsg";
const CHECKPOINT_NONCE_INPUT: &str = "nh";
const LOGOUT_HASH_INPUT: &str = "h";

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginState {
    Unauthenticated,
    SubmittingCredentials,
    SecurityCodeRequested,
    SaveDevicePrompt,
    AccountCheckup,
    ConfirmIdentity,
    Authenticated,
    Failed,
}

const CHECKPOINT_STEPS: [LoginState; 4] = [
    LoginState::SecurityCodeRequested,
    LoginState::SaveDevicePrompt,
    LoginState::AccountCheckup,
    LoginState::ConfirmIdentity,
];

/// Supplies the out-of-band code when login hits a checkpoint.
#[async_trait]
pub trait SecurityCodeProvider: Send + Sync {
    async fn security_code(&self) -> anyhow::Result<String>;
}

pub struct MissingSecurityCodeProvider;

#[async_trait]
impl SecurityCodeProvider for MissingSecurityCodeProvider {
    async fn security_code(&self) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no security code provider configured"))
    }
}

/// Adapts a plain closure into a [`SecurityCodeProvider`].
pub struct FnCodeProvider<F>(pub F);

#[async_trait]
impl<F> SecurityCodeProvider for FnCodeProvider<F>
where
    F: Fn() -> anyhow::Result<String> + Send + Sync,
{
    async fn security_code(&self) -> anyhow::Result<String> {
        (self.0)()
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("login landed on {url}")]
    Rejected { url: String },
    #[error("authenticated page is missing `{0}`")]
    MissingArtifact(&'static str),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<TransportError> for AttemptError {
    fn from(err: TransportError) -> Self {
        AttemptError::Auth(AuthError::Transport(err))
    }
}

/// Anti-CSRF token and checkpoint nonce carried from page to page.
struct CheckpointTokens {
    csrf_token: String,
    nonce: String,
}

impl CheckpointTokens {
    fn scrape(html: &str) -> Option<Self> {
        Some(Self {
            csrf_token: scrape::input_value(html, CSRF_INPUT)?,
            nonce: scrape::input_value(html, CHECKPOINT_NONCE_INPUT)?,
        })
    }

    /// Prefer tokens from the current page, keeping the previous ones when absent.
    fn refresh(&mut self, html: &str) {
        if let Some(token) = scrape::input_value(html, CSRF_INPUT) {
            self.csrf_token = token;
        }
        if let Some(nonce) = scrape::input_value(html, CHECKPOINT_NONCE_INPUT) {
            self.nonce = nonce;
        }
    }

    fn form(&self, step: LoginState, code: &str) -> Params {
        let mut form = Params::new();
        form.insert(CSRF_INPUT.into(), self.csrf_token.clone());
        form.insert(CHECKPOINT_NONCE_INPUT.into(), self.nonce.clone());
        let fields: Vec<(&str, &str)> = match step {
            LoginState::SecurityCodeRequested => vec![
                ("approvals_code", code),
                ("submit[Submit Code]", "Submit Code"),
                ("codes_submitted", "0"),
            ],
            LoginState::SaveDevicePrompt => vec![
                ("name_action_selected", "dont_save"),
                ("submit[Continue]", "Continue"),
            ],
            LoginState::AccountCheckup => vec![("submit[Continue]", "Continue")],
            LoginState::ConfirmIdentity => vec![("submit[This was me]", "This Was Me")],
            _ => Vec::new(),
        };
        form.extend(
            fields
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        form
    }
}

pub struct Authenticator {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    code_provider: Arc<dyn SecurityCodeProvider>,
    transitions: Vec<LoginState>,
}

impl Authenticator {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ClientConfig) -> Self {
        Self::with_code_provider(transport, config, Arc::new(MissingSecurityCodeProvider))
    }

    pub fn with_code_provider(
        transport: Arc<dyn HttpTransport>,
        config: ClientConfig,
        code_provider: Arc<dyn SecurityCodeProvider>,
    ) -> Self {
        Self {
            transport,
            config,
            code_provider,
            transitions: vec![LoginState::Unauthenticated],
        }
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    /// States visited by the most recent `authenticate` call, in order.
    pub fn transitions(&self) -> &[LoginState] {
        &self.transitions
    }

    pub fn state(&self) -> LoginState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LoginState::Unauthenticated)
    }

    fn enter(&mut self, state: LoginState) {
        debug!("auth: state={state:?}");
        self.transitions.push(state);
    }

    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.transitions.clear();
        self.enter(LoginState::Unauthenticated);

        if !credentials.is_complete() {
            self.enter(LoginState::Failed);
            return Err(AuthError::InvalidCredentials);
        }

        info!("auth: logging in email={}", credentials.email);
        let max_attempts = self.config.max_retries.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(credentials).await {
                Ok(session) => {
                    info!("auth: login of {} successful", credentials.email);
                    return Ok(session);
                }
                Err(AttemptError::Auth(err)) if err.is_terminal() => {
                    warn!("auth: attempt #{attempt} failed terminally: {err}");
                    self.enter(LoginState::Failed);
                    return Err(err);
                }
                Err(err) => {
                    let retrying = attempt < max_attempts;
                    warn!(
                        "auth: attempt #{attempt} failed: {err}{}",
                        if retrying { ", retrying" } else { "" }
                    );
                    if retrying {
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                }
            }
        }

        self.enter(LoginState::Failed);
        Err(AuthError::LoginFailed {
            attempts: max_attempts,
        })
    }

    async fn attempt(&mut self, credentials: &Credentials) -> Result<Session, AttemptError> {
        self.enter(LoginState::SubmittingCredentials);
        let timeout = self.config.request_timeout();
        let endpoints = self.config.endpoints.clone();

        let login_page = self
            .transport
            .get(&endpoints.mobile_home, &Params::new(), timeout)
            .await?;
        let mut form = scrape::hidden_form(&login_page.body);
        form.insert("email".into(), credentials.email.clone());
        form.insert("pass".into(), credentials.password.clone());
        form.insert("login".into(), "Log In".into());

        let mut response = self
            .transport
            .post_form(&endpoints.login, &form, timeout)
            .await?;

        if response.url_contains(CHECKPOINT_MARKER) && response.body.contains(SECURITY_CODE_PROMPT)
        {
            response = self.checkpoint(response).await?;
        }

        if response.url_contains(SAVE_DEVICE_MARKER) {
            self.enter(LoginState::SaveDevicePrompt);
            response = self
                .transport
                .get(&endpoints.save_device, &Params::new(), timeout)
                .await?;
        }

        if !response.url_contains(HOME_MARKER) {
            return Err(AttemptError::Rejected { url: response.url });
        }

        let session = self.establish_session().await?;
        self.enter(LoginState::Authenticated);
        Ok(session)
    }

    async fn checkpoint(&mut self, page: HttpResponse) -> Result<HttpResponse, AttemptError> {
        let mut tokens = CheckpointTokens::scrape(&page.body)
            .ok_or(AttemptError::MissingArtifact(CHECKPOINT_NONCE_INPUT))?;
        let checkpoint_url = self.config.endpoints.checkpoint.clone();
        let timeout = self.config.request_timeout();
        let mut current = page;
        let mut code = String::new();

        for step in CHECKPOINT_STEPS {
            self.enter(step);
            if step == LoginState::SecurityCodeRequested {
                code = self
                    .code_provider
                    .security_code()
                    .await
                    .map_err(|err| AuthError::CodeUnavailable(err.to_string()))?;
            }
            info!("auth: checkpoint step={step:?}");

            tokens.refresh(&current.body);
            current = self
                .transport
                .post_form(&checkpoint_url, &tokens.form(step, code.trim()), timeout)
                .await?;
            if current.url_contains(HOME_MARKER) {
                return Ok(current);
            }
        }

        Err(AuthError::CheckpointExhausted.into())
    }

    /// Reads the identity cookie and scrapes the home page into a fresh session.
    async fn establish_session(&self) -> Result<Session, AttemptError> {
        let home = self
            .transport
            .get(&self.config.endpoints.base, &Params::new(), self.config.request_timeout())
            .await?;
        let cookies = self.transport.cookies().await;
        let user_id = cookies
            .identity()
            .ok_or(AttemptError::MissingArtifact(IDENTITY_COOKIE))?;

        let artifacts = AuthArtifacts {
            csrf_token: scrape::input_value(&home.body, CSRF_INPUT)
                .ok_or(AttemptError::MissingArtifact(CSRF_INPUT))?,
            revision: scrape::revision(&home.body)
                .ok_or(AttemptError::MissingArtifact("revision"))?,
            logout_hash: scrape::input_value(&home.body, LOGOUT_HASH_INPUT),
        };

        Ok(Session::authenticated(
            user_id,
            generate_client_id(),
            artifacts,
            cookies,
        ))
    }

    /// Rebuilds a session from exported cookies, or `None` when login is required.
    pub async fn restore_session(&mut self, snapshot: &CookieSnapshot) -> Option<Session> {
        if snapshot.identity().is_none() {
            debug!("auth: cookie snapshot has no {IDENTITY_COOKIE}; cannot restore");
            return None;
        }

        self.transport.import_cookies(snapshot).await;
        if !self.is_logged_in().await {
            info!("auth: stored session was not accepted");
            return None;
        }

        match self.establish_session().await {
            Ok(session) => {
                self.transitions = vec![LoginState::Authenticated];
                Some(session)
            }
            Err(err) => {
                warn!("auth: session restore failed: {err}");
                None
            }
        }
    }

    /// Restores from `snapshot` when given and accepted, otherwise logs in.
    pub async fn restore_or_authenticate(
        &mut self,
        credentials: &Credentials,
        snapshot: Option<&CookieSnapshot>,
    ) -> Result<Session, AuthError> {
        if let Some(snapshot) = snapshot {
            if let Some(session) = self.restore_session(snapshot).await {
                return Ok(session);
            }
        }
        self.authenticate(credentials).await
    }

    /// The login page redirects to home while the cookies are valid.
    pub async fn is_logged_in(&self) -> bool {
        match self
            .transport
            .get(&self.config.endpoints.login, &Params::new(), self.config.request_timeout())
            .await
        {
            Ok(response) => response.url_contains(HOME_MARKER),
            Err(err) => {
                warn!("auth: logged-in check failed: {err}");
                false
            }
        }
    }

    /// Signs out remotely, then clears the session and cookies whatever the server said.
    pub async fn logout(&mut self, signer: &mut RequestSigner) -> Result<(), AuthError> {
        let mut extra = Params::new();
        extra.insert("ref".into(), "mb".into());
        if let Some(hash) = signer.session().logout_hash() {
            extra.insert(LOGOUT_HASH_INPUT.into(), hash.to_string());
        }

        let result = signer
            .get(
                self.transport.as_ref(),
                &self.config.endpoints.logout,
                extra,
                self.config.request_timeout(),
            )
            .await;

        signer.session_mut().reset();
        self.transport.reset().await?;
        self.transitions = vec![LoginState::Unauthenticated];
        result.map(|_| ()).map_err(AuthError::from)
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
