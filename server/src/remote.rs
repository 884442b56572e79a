//! HTTP client for the system of record.
//!
//! JSON over HTTP with an opaque bearer credential:
//!
//! | call                  | request                      |
//! |-----------------------|------------------------------|
//! | start                 | `POST /sync/start`           |
//! | status                | `GET /sync/status/{id}`      |
//! | resolve               | `POST /sync/resolve/{id}`    |
//! | reconciliation report | `GET /reconciliation`        |
//!
//! Connection failures, timeouts, 429 and 5xx are transient; every other
//! failure is fatal.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tally_engine::{ResolutionEntry, SyncResult};
use tally_session::{
    RemoteError, RemoteReport, RemoteStatus, RemoteSyncApi, ReportOptions, SyncOptions,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`RemoteSyncApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    sync_id: String,
}

#[derive(Serialize)]
struct ResolveRequest<'a> {
    resolutions: &'a [ResolutionEntry],
}

impl HttpSyncApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Fatal(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl RemoteSyncApi for HttpSyncApi {
    async fn start(&self, options: &SyncOptions) -> Result<String, RemoteError> {
        let response: StartResponse = self
            .send(self.client.post(self.url("/sync/start")).json(options))
            .await?;
        Ok(response.sync_id)
    }

    async fn status(&self, remote_id: &str) -> Result<RemoteStatus, RemoteError> {
        self.send(self.client.get(self.url(&format!("/sync/status/{}", remote_id))))
            .await
    }

    async fn resolve(
        &self,
        remote_id: &str,
        resolutions: &[ResolutionEntry],
    ) -> Result<SyncResult, RemoteError> {
        self.send(
            self.client
                .post(self.url(&format!("/sync/resolve/{}", remote_id)))
                .json(&ResolveRequest { resolutions }),
        )
        .await
    }

    async fn reconciliation_report(
        &self,
        options: &ReportOptions,
    ) -> Result<RemoteReport, RemoteError> {
        self.send(self.client.get(self.url("/reconciliation")).query(options))
            .await
    }
}

/// Map a failed request (no response) to a remote error.
fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RemoteError::Transient(err.to_string())
    } else {
        RemoteError::Fatal(err.to_string())
    }
}

/// Map a non-success HTTP status to a remote error.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.trim())
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Transient(message)
    } else {
        RemoteError::Fatal(message)
    }
}
