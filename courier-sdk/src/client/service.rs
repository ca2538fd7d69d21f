//! Service API client (application backend → Courier server).
//!
//! All requests use body-signed HMAC-SHA256 authentication via
//! [`SignedObject`]. Mutating calls take an idempotency key: retrying a call
//! with the same key and body is always safe.

use reqwest::Client;
use url::Url;
use uuid::Uuid;

use super::{ClientError, Replayable, parse_response};
use crate::objects::{
    BatchSummary, CreateDispatchUnit, DispatchUnitResponse, RunBatchRequest, SendUnitRequest,
    Signature, SkipUnitRequest, UnitRef,
};
use crate::signature::{CLIENT_HEADER, IDEMPOTENCY_KEY_HEADER, SIGNATURE_HEADER, SignedObject};

/// Typed HTTP client for the Courier **Service API**.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: Url,
    client_name: String,
    secret: Vec<u8>,
}

impl ServiceClient {
    /// * `base_url` – root URL of the Courier server.
    /// * `client_name` – the `[[clients]]` entry this caller is configured as.
    /// * `secret` – that client's HMAC secret.
    pub fn new(base_url: Url, client_name: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            client_name: client_name.into(),
            secret: secret.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /api/v1/service/units` – create a queued unit.
    pub async fn create_unit(
        &self,
        idempotency_key: &str,
        payload: CreateDispatchUnit,
    ) -> Result<Replayable<DispatchUnitResponse>, ClientError> {
        self.post("/api/v1/service/units", Some(idempotency_key), payload)
            .await
    }

    /// `POST /api/v1/service/units/status` – fetch a unit.
    pub async fn get_unit(&self, unit_id: Uuid) -> Result<DispatchUnitResponse, ClientError> {
        self.post("/api/v1/service/units/status", None, UnitRef { unit_id })
            .await
            .map(|r| r.value)
    }

    /// `POST /api/v1/service/units/send` – send one unit now.
    pub async fn send_unit(
        &self,
        idempotency_key: &str,
        request: SendUnitRequest,
    ) -> Result<Replayable<DispatchUnitResponse>, ClientError> {
        self.post("/api/v1/service/units/send", Some(idempotency_key), request)
            .await
    }

    /// `POST /api/v1/service/units/skip` – mark a unit as not-to-be-sent.
    pub async fn skip_unit(
        &self,
        idempotency_key: &str,
        request: SkipUnitRequest,
    ) -> Result<Replayable<DispatchUnitResponse>, ClientError> {
        self.post("/api/v1/service/units/skip", Some(idempotency_key), request)
            .await
    }

    /// `POST /api/v1/service/batches` – trigger a dispatch batch.
    pub async fn run_batch(
        &self,
        idempotency_key: &str,
        request: RunBatchRequest,
    ) -> Result<Replayable<BatchSummary>, ClientError> {
        self.post("/api/v1/service/batches", Some(idempotency_key), request)
            .await
    }

    async fn post<B: Signature, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        idempotency_key: Option<&str>,
        body: B,
    ) -> Result<Replayable<T>, ClientError> {
        let signed = SignedObject::new(body, &self.secret)?;
        let url = self.base_url.join(path)?;

        let mut request = self
            .http
            .post(url)
            .header(SIGNATURE_HEADER, signed.to_header())
            .header(CLIENT_HEADER, &self.client_name)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        let resp = request.body(signed.json).send().await?;
        parse_response(resp).await
    }
}
