//! In-memory [`HttpTransport`] replaying scripted responses in order.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::TransportError,
    session::CookieSnapshot,
    transport::{HttpResponse, HttpTransport, Params},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub params: Params,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    cookies: Mutex<CookieSnapshot>,
    resets: Mutex<u32>,
}

pub(crate) fn page(url: &str, body: &str) -> HttpResponse {
    HttpResponse {
        url: url.to_string(),
        status: 200,
        body: body.to_string(),
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn respond(&self, url: &str, body: &str) {
        self.push(Ok(page(url, body)));
    }

    pub fn fail(&self, err: TransportError) {
        self.push(Err(err));
    }

    pub fn set_cookies(&self, snapshot: CookieSnapshot) {
        *self.cookies.lock().unwrap() = snapshot;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    pub fn resets(&self) -> u32 {
        *self.resets.lock().unwrap()
    }

    fn next(
        &self,
        method: &'static str,
        url: &str,
        params: &Params,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            params: params.clone(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request(format!("no scripted response for {url}"))))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        query: &Params,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.next("GET", url, query)
    }

    async fn post_form(
        &self,
        url: &str,
        form: &Params,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.next("POST", url, form)
    }

    async fn cookies(&self) -> CookieSnapshot {
        self.cookies.lock().unwrap().clone()
    }

    async fn import_cookies(&self, snapshot: &CookieSnapshot) {
        let mut cookies = self.cookies.lock().unwrap();
        for (name, value) in snapshot.iter() {
            cookies.insert(name.clone(), value.clone());
        }
    }

    async fn reset(&self) -> Result<(), TransportError> {
        *self.cookies.lock().unwrap() = CookieSnapshot::new();
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }
}
