//! JSON-over-HTTP adapter for the remote catalog.
//!
//! ureq is blocking, so every call runs on the blocking pool via
//! `spawn_blocking`. Endpoints, relative to `remote.base_url`:
//!
//! ```text
//! POST {base}/{type}/batch          {"items": [Entity]}      -> CreateResponse
//! POST {base}/{type}/batch-delete   {"keys": [key]}          -> DeleteResponse
//! POST {base}/{type}/query          {"keys": [key]}          -> QueryResponse
//! GET  {base}/{type}?offset=&limit=&prefix=…                 -> ScanPage
//! ```

use std::io;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use catsync_core::config::RemoteConfig;
use catsync_core::{Entity, EntityType, NaturalKey};
use catsync_engine::remote::{
    CatalogRemote, CreateResponse, DeleteResponse, PageRequest, QueryResponse, ScanPage,
};
use catsync_engine::{KeyPattern, NetworkFault, RemoteError};

#[derive(Serialize)]
struct ItemsBody<'a> {
    items: &'a [Entity],
}

#[derive(Serialize)]
struct KeysBody<'a> {
    keys: &'a [NaturalKey],
}

#[derive(Clone)]
pub struct HttpRemote {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    /// Build from config, reading the bearer token from `token_env` if set.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let token = match &config.token_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("remote token variable '{var}' is not set"))?,
            ),
            None => None,
        };
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, entity_type: EntityType, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, entity_type.as_str(), suffix)
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, RemoteError> {
        let request = self.authorize(self.agent.post(url));
        let response = request.send_json(body).map_err(map_error)?;
        decode(response)
    }

    fn get_page(
        &self,
        url: &str,
        prefixes: &[String],
        page: PageRequest,
    ) -> Result<ScanPage, RemoteError> {
        let mut request = self
            .authorize(self.agent.get(url))
            .query("offset", &page.offset.to_string())
            .query("limit", &page.limit.to_string());
        for prefix in prefixes {
            request = request.query("prefix", prefix);
        }
        let response = request.call().map_err(map_error)?;
        decode(response)
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(HttpRemote) -> Result<T, RemoteError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || call(this))
            .await
            .map_err(|err| RemoteError::Protocol(format!("blocking call failed: {err}")))?
    }
}

fn decode<R: DeserializeOwned>(response: ureq::Response) -> Result<R, RemoteError> {
    response
        .into_json()
        .map_err(|err| RemoteError::Protocol(format!("invalid response body: {err}")))
}

/// Map ureq failures onto the engine's retry taxonomy.
fn map_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(code, response) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            RemoteError::Status { code, message }
        }
        ureq::Error::Transport(transport) => match transport.kind() {
            ureq::ErrorKind::Dns => RemoteError::Network(NetworkFault::Dns),
            ureq::ErrorKind::ConnectionFailed => {
                RemoteError::Network(NetworkFault::ConnectionRefused)
            }
            ureq::ErrorKind::Io => {
                let kind = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<io::Error>())
                    .map(io::Error::kind);
                RemoteError::Network(io_fault(kind))
            }
            _ => RemoteError::Protocol(transport.to_string()),
        },
    }
}

fn io_fault(kind: Option<io::ErrorKind>) -> NetworkFault {
    match kind {
        Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => NetworkFault::Timeout,
        Some(io::ErrorKind::ConnectionRefused) => NetworkFault::ConnectionRefused,
        _ => NetworkFault::ConnectionReset,
    }
}

#[async_trait]
impl CatalogRemote for HttpRemote {
    async fn create(
        &self,
        entity_type: EntityType,
        batch: &[Entity],
    ) -> Result<CreateResponse, RemoteError> {
        let url = self.url(entity_type, "/batch");
        let items = batch.to_vec();
        self.blocking(move |remote| remote.post(&url, &ItemsBody { items: &items }))
            .await
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<DeleteResponse, RemoteError> {
        let url = self.url(entity_type, "/batch-delete");
        let keys = keys.to_vec();
        self.blocking(move |remote| remote.post(&url, &KeysBody { keys: &keys }))
            .await
    }

    async fn query_by_keys(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<QueryResponse, RemoteError> {
        let url = self.url(entity_type, "/query");
        let keys = keys.to_vec();
        self.blocking(move |remote| remote.post(&url, &KeysBody { keys: &keys }))
            .await
    }

    async fn scan(
        &self,
        entity_type: EntityType,
        pattern: Option<&KeyPattern>,
        page: PageRequest,
    ) -> Result<ScanPage, RemoteError> {
        let url = self.url(entity_type, "");
        // Exact keys are their own prefix; the caller re-filters with the full pattern.
        let prefixes: Vec<String> = pattern
            .map(|p| p.prefixes().iter().chain(p.exact_keys()).cloned().collect())
            .unwrap_or_default();
        self.blocking(move |remote| remote.get_page(&url, &prefixes, page))
            .await
    }
}
