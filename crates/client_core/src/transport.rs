//! HTTP seam between the client core and the remote service.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT},
    Client,
};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{config::ClientConfig, error::TransportError, session::CookieSnapshot};

/// Query string or form body parameters, kept sorted for stable requests.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn url_contains(&self, marker: &str) -> bool {
        self.url.contains(marker)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        query: &Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
    async fn post_form(
        &self,
        url: &str,
        form: &Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
    async fn cookies(&self) -> CookieSnapshot;
    async fn import_cookies(&self, snapshot: &CookieSnapshot);
    /// Drops every cookie, as after a logout.
    async fn reset(&self) -> Result<(), TransportError>;
}

struct ReqwestInner {
    http: Client,
    jar: Arc<Jar>,
}

/// [`HttpTransport`] backed by `reqwest` with an in-memory cookie jar.
pub struct ReqwestTransport {
    inner: RwLock<ReqwestInner>,
    cookie_url: Url,
    cookie_domain: String,
    headers: HeaderMap,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let cookie_url = Url::parse(&config.endpoints.base)
            .with_context(|| format!("invalid base url '{}'", config.endpoints.base))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.resolve_user_agent()).context("invalid user agent")?,
        );
        let origin = HeaderValue::from_str(config.endpoints.base.trim_end_matches('/'))
            .context("invalid base url header")?;
        headers.insert(REFERER, origin.clone());
        headers.insert(ORIGIN, origin);

        let inner = Self::build_inner(&headers)?;
        Ok(Self {
            inner: RwLock::new(inner),
            cookie_url,
            cookie_domain: config.endpoints.cookie_domain.clone(),
            headers,
        })
    }

    fn build_inner(headers: &HeaderMap) -> Result<ReqwestInner, TransportError> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(headers.clone())
            .build()?;
        Ok(ReqwestInner { http, jar })
    }

    async fn client(&self) -> Client {
        self.inner.read().await.http.clone()
    }

    async fn read_response(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("transport: response status={status} url={url} bytes={}", body.len());
        Ok(HttpResponse { url, status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client()
            .await
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        Self::read_response(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &Params,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client()
            .await
            .post(url)
            .form(form)
            .timeout(timeout)
            .send()
            .await?;
        Self::read_response(response).await
    }

    async fn cookies(&self) -> CookieSnapshot {
        let jar = Arc::clone(&self.inner.read().await.jar);
        jar.cookies(&self.cookie_url)
            .and_then(|header| header.to_str().ok().map(CookieSnapshot::from_header))
            .unwrap_or_default()
    }

    async fn import_cookies(&self, snapshot: &CookieSnapshot) {
        let jar = Arc::clone(&self.inner.read().await.jar);
        for (name, value) in snapshot.iter() {
            let cookie = if self.cookie_domain.is_empty() {
                format!("{name}={value}; Path=/")
            } else {
                format!("{name}={value}; Domain={}; Path=/", self.cookie_domain)
            };
            jar.add_cookie_str(&cookie, &self.cookie_url);
        }
    }

    async fn reset(&self) -> Result<(), TransportError> {
        let fresh = Self::build_inner(&self.headers)?;
        *self.inner.write().await = fresh;
        Ok(())
    }
}
