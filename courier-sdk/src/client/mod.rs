//! HTTP clients for the Courier APIs.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

mod callback;
mod service;

pub use callback::CallbackClient;
pub use service::ServiceClient;

use reqwest::StatusCode;

use crate::signature::SignatureError;

/// Errors produced by the SDK HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// HMAC signature could not be computed.
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// A decoded response plus whether the server replayed it from the
/// idempotency ledger.
#[derive(Debug, Clone)]
pub struct Replayable<T> {
    pub value: T,
    pub replayed: bool,
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<Replayable<T>, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let replayed = resp
        .headers()
        .get(crate::signature::IDEMPOTENT_REPLAYED_HEADER)
        .is_some_and(|v| v.as_bytes() == b"true");
    let bytes = resp.bytes().await?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(Replayable { value, replayed })
}
