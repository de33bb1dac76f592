//! Long-poll engine: channel handshake, pull, keepalive and the listening loop.
//!
//! One cycle (keepalive, pull, classify, dispatch) finishes before the next
//! starts. The stop signal is checked once per iteration and never interrupts
//! an in-flight call.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chat_shared::protocol::{decode_body, HandshakeResponse, PullResponse, RawEnvelope};
use tracing::{debug, info, warn};

use crate::{
    classifier::DeltaClassifier,
    config::ClientConfig,
    dispatcher::EventDispatcher,
    error::{ChannelError, PollError, TransportError},
    session::{CookieSnapshot, Session},
    signer::RequestSigner,
    transport::{HttpResponse, HttpTransport, Params},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Stopped,
}

/// Session-affinity tokens of the acquired channel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyState {
    pub sticky_token: String,
    pub pool_id: String,
}

/// Cooperative stop signal, cloneable across tasks.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What one listening cycle amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Events classified and handed to the dispatcher.
    Delivered(usize),
    /// Timeout or empty envelope.
    NoData,
    /// Transport or decode failure; the loop keeps going.
    Degraded,
}

pub struct Listener {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    signer: RequestSigner,
    classifier: DeltaClassifier,
    dispatcher: EventDispatcher,
    sticky: Option<StickyState>,
    state: ListenerState,
    stop: StopHandle,
}

impl Listener {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ClientConfig, session: Session) -> Self {
        Self::with_dispatcher(transport, config, session, EventDispatcher::new())
    }

    pub fn with_dispatcher(
        transport: Arc<dyn HttpTransport>,
        config: ClientConfig,
        session: Session,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            transport,
            config,
            signer: RequestSigner::new(session),
            classifier: DeltaClassifier::new(),
            dispatcher,
            sticky: None,
            state: ListenerState::Idle,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn sticky(&self) -> Option<&StickyState> {
        self.sticky.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn signer_mut(&mut self) -> &mut RequestSigner {
        &mut self.signer
    }

    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    /// Cookies currently held by the transport, including any the channel has rotated since login.
    pub async fn export_cookies(&self) -> CookieSnapshot {
        self.transport.cookies().await
    }

    /// Handshake against the pull endpoint for the sticky and pool tokens.
    pub async fn acquire_channel(&mut self) -> Result<StickyState, ChannelError> {
        let session = self.signer.session();
        if !session.is_authenticated() {
            return Err(ChannelError::NotAuthenticated);
        }

        let extra = params([
            ("msgs_recv", "0"),
            ("channel", session.channel_name()),
            ("clientid", session.client_id()),
        ]);
        let response = self
            .signer
            .get(
                self.transport.as_ref(),
                &self.config.endpoints.pull,
                extra,
                self.config.request_timeout(),
            )
            .await?;
        ensure_success(&response)?;

        let handshake: HandshakeResponse = decode_body(&response.body).map_err(|err| {
            warn!("listener: handshake body undecodable: {err}");
            ChannelError::HandshakeMalformed
        })?;
        let (sticky_token, pool_id) = handshake
            .lb_info
            .and_then(|lb| lb.tokens())
            .ok_or(ChannelError::HandshakeMalformed)?;

        debug!("listener: channel acquired pool={pool_id}");
        Ok(StickyState {
            sticky_token,
            pool_id,
        })
    }

    /// One pull. Records the server sequence and renews the tokens when the response carries them.
    pub async fn poll(&mut self) -> Result<RawEnvelope, PollError> {
        let sticky = self.sticky.as_ref().ok_or(PollError::NoChannel)?;
        let extra = params([
            ("msgs_recv", "0"),
            ("sticky_token", sticky.sticky_token.as_str()),
            ("sticky_pool", sticky.pool_id.as_str()),
            ("clientid", self.signer.session().client_id()),
        ]);

        let response = self
            .signer
            .get(
                self.transport.as_ref(),
                &self.config.endpoints.pull,
                extra,
                self.config.request_timeout(),
            )
            .await?;
        ensure_success(&response)?;

        let pull: PullResponse = decode_body(&response.body)?;
        if pull.requests_refresh() {
            return Err(PollError::ChannelInvalidated);
        }
        if let Some(seq) = pull.next_seq() {
            self.signer.session_mut().record_server_seq(seq);
        }
        if let Some((sticky_token, pool_id)) = pull.lb_info.as_ref().and_then(|lb| lb.tokens()) {
            debug!("listener: channel tokens renewed pool={pool_id}");
            self.sticky = Some(StickyState {
                sticky_token,
                pool_id,
            });
        }
        Ok(pull.into_envelope())
    }

    /// Liveness ping. Failures are only logged.
    pub async fn keep_alive(&mut self) -> bool {
        let Some(sticky) = self.sticky.as_ref() else {
            return false;
        };
        let session = self.signer.session();
        let uid = session
            .user_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let extra = params([
            ("channel", session.channel_name()),
            ("clientid", session.client_id()),
            ("partition", "-2"),
            ("cap", "0"),
            ("uid", uid.as_str()),
            ("sticky", sticky.sticky_token.as_str()),
            ("viewer_uid", uid.as_str()),
        ]);

        match self
            .signer
            .get(
                self.transport.as_ref(),
                &self.config.endpoints.ping,
                extra,
                self.config.request_timeout(),
            )
            .await
        {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                warn!("listener: keepalive rejected status={}", response.status);
                false
            }
            Err(err) => {
                warn!("listener: keepalive failed: {err}");
                false
            }
        }
    }

    /// Acquires the channel and enters `Listening`. On failure the state is left unchanged.
    pub async fn start(&mut self) -> Result<(), ChannelError> {
        if self.state == ListenerState::Listening {
            debug!("listener: already listening");
            return Ok(());
        }
        let sticky = self.acquire_channel().await?;
        self.sticky = Some(sticky);
        self.state = ListenerState::Listening;
        info!("listener: listening channel={}", self.signer.session().channel_name());
        Ok(())
    }

    /// Leaves `Listening` and forgets the channel tokens. No-op while `Idle`.
    pub fn stop(&mut self) {
        if self.state == ListenerState::Idle {
            return;
        }
        self.sticky = None;
        self.state = ListenerState::Stopped;
        info!("listener: stopped");
    }

    /// Keepalive (when enabled), pull, classify and dispatch. Only a channel
    /// invalidation is returned as an error, after the listener has stopped.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ChannelError> {
        if self.state != ListenerState::Listening {
            return Err(ChannelError::NotListening);
        }
        if self.config.mark_alive {
            self.keep_alive().await;
        }

        match self.poll().await {
            Ok(envelope) if envelope.is_empty() => Ok(CycleOutcome::NoData),
            Ok(envelope) => {
                let events = self.classifier.classify(&envelope);
                let summary = self.dispatcher.publish_all(&events);
                debug!(
                    "listener: entries={} events={} handler_failures={}",
                    envelope.len(),
                    events.len(),
                    summary.failed
                );
                Ok(CycleOutcome::Delivered(events.len()))
            }
            Err(PollError::Timeout) => {
                debug!("listener: pull timed out; no data this cycle");
                Ok(CycleOutcome::NoData)
            }
            Err(err) if err.is_fatal() => {
                warn!("listener: {err}; stopping");
                self.stop();
                Err(ChannelError::Invalidated)
            }
            Err(err) => {
                warn!("listener: {err}");
                Ok(CycleOutcome::Degraded)
            }
        }
    }

    /// Starts if needed, then cycles until a stop is requested or the channel is invalidated.
    /// The stop request is consumed however the loop ends.
    pub async fn listen(&mut self) -> Result<(), ChannelError> {
        let outcome = self.listen_until_stopped().await;
        self.stop.clear();
        outcome
    }

    async fn listen_until_stopped(&mut self) -> Result<(), ChannelError> {
        self.start().await?;

        while !self.stop.is_stop_requested() {
            if self.run_cycle().await? == CycleOutcome::Degraded {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        self.stop();
        Ok(())
    }
}

fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Params {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn ensure_success(response: &HttpResponse) -> Result<(), TransportError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(response.status))
    }
}

#[cfg(test)]
#[path = "tests/listener_tests.rs"]
mod tests;
