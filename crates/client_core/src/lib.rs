//! Session bootstrap and push-channel listening for a web chat service.
//!
//! [`auth::Authenticator`] logs in (or restores exported cookies) and yields a
//! [`session::Session`]. A [`listener::Listener`] owns that session through a
//! [`signer::RequestSigner`], long-polls the push channel, classifies each
//! envelope with [`classifier::DeltaClassifier`] and hands the events to an
//! [`dispatcher::EventDispatcher`].

pub mod auth;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod scrape;
pub mod session;
pub mod signer;
pub mod transport;

pub use auth::{Authenticator, Credentials, FnCodeProvider, LoginState, SecurityCodeProvider};
pub use classifier::DeltaClassifier;
pub use config::{load_config, ClientConfig, Endpoints};
pub use dispatcher::{DispatchSummary, EventDispatcher};
pub use error::{AuthError, ChannelError, PollError, TransportError};
pub use listener::{CycleOutcome, Listener, ListenerState, StickyState, StopHandle};
pub use session::{CookieSnapshot, Session};
pub use signer::{RequestSigner, SignedRequest};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
