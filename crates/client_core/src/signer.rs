use std::time::Duration;

use crate::{
    error::TransportError,
    session::Session,
    transport::{HttpResponse, HttpTransport, Params},
};

const REQUEST_ID_PARAM: &str = "__req";
const SEQ_PARAM: &str = "seq";

/// Parameters for exactly one outbound call. Never reuse one for a second call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub sequence: u64,
    pub params: Params,
}

/// Owns the [`Session`] and is the only place its request sequence advances.
#[derive(Debug)]
pub struct RequestSigner {
    session: Session,
}

impl RequestSigner {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Session defaults overlaid with `extra`, plus request id and channel sequence.
    pub fn sign<I, K, V>(&mut self, extra: I) -> SignedRequest
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = self.session.default_params().clone();
        params.extend(
            extra
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );

        let sequence = self.session.advance_sequence();
        params.insert(REQUEST_ID_PARAM.to_string(), to_base36(sequence));
        params.insert(SEQ_PARAM.to_string(), self.session.last_seq().to_string());

        SignedRequest { sequence, params }
    }

    pub async fn get(
        &mut self,
        transport: &dyn HttpTransport,
        url: &str,
        extra: Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.sign(extra);
        transport.get(url, &request.params, timeout).await
    }

    pub async fn post(
        &mut self,
        transport: &dyn HttpTransport,
        url: &str,
        extra: Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.sign(extra);
        transport.post_form(url, &request.params, timeout).await
    }
}

pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[path = "tests/signer_tests.rs"]
mod tests;
