//! Callback client used by workflow integrations to report outcomes.

use reqwest::Client;
use url::Url;

use super::{ClientError, Replayable, parse_response};
use crate::objects::{CallbackResponse, DispatchCallback};
use crate::signature::{CALLBACK_SECRET_HEADER, IDEMPOTENCY_KEY_HEADER};

/// Posts [`DispatchCallback`]s to `POST /api/v1/callbacks/dispatch`.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: Client,
    base_url: Url,
    secret: String,
}

impl CallbackClient {
    pub fn new(base_url: Url, callback_secret: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            secret: callback_secret.into(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Report an outcome. Pass the provider's delivery id (or any stable
    /// per-delivery token) as `idempotency_key` so redelivered callbacks
    /// are collapsed by the server.
    pub async fn report(
        &self,
        callback: &DispatchCallback,
        idempotency_key: Option<&str>,
    ) -> Result<Replayable<CallbackResponse>, ClientError> {
        let url = self.base_url.join("/api/v1/callbacks/dispatch")?;
        let mut request = self
            .http
            .post(url)
            .header(CALLBACK_SECRET_HEADER, &self.secret)
            .json(callback);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        let resp = request.send().await?;
        parse_response(resp).await
    }
}
