//! Hand-off of render jobs to the external workflow engine.
//!
//! The workflow accepts a signed [`RenderJob`] over HTTP and reports the
//! delivery outcome later through the callback endpoint. A 2xx answer only
//! means the job was accepted.

use std::sync::Arc;
use std::time::Duration;

use courier_sdk::objects::{RenderJob, RenderJobAccepted};
use courier_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use kanau::processor::Processor;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::WorkflowConfig;

/// Longest response body kept in a [`TransportError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("workflow did not answer within {0:?}")]
    Timeout(Duration),
    #[error("workflow unreachable: {0}")]
    Unreachable(String),
    #[error("workflow rejected render job with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("workflow rate limited the render job")]
    RateLimited,
    #[error("failed to encode render job: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited)
    }
}

/// Anything that can take a render job off our hands.
pub trait JobSink:
    Processor<RenderJob, Output = RenderJobAccepted, Error = TransportError>
{
}

impl<T> JobSink for T where
    T: Processor<RenderJob, Output = RenderJobAccepted, Error = TransportError>
{
}

/// HTTP client for the workflow engine.
///
/// Reads [`WorkflowConfig`] on every send, so a SIGHUP reload takes
/// effect for the next job.
#[derive(Clone)]
pub struct WorkflowChannel {
    http_client: reqwest::Client,
    config: Arc<RwLock<WorkflowConfig>>,
}

impl WorkflowChannel {
    pub fn new(http_client: reqwest::Client, config: Arc<RwLock<WorkflowConfig>>) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

impl Processor<RenderJob> for WorkflowChannel {
    type Output = RenderJobAccepted;
    type Error = TransportError;

    #[tracing::instrument(skip_all, err, name = "HTTP:RenderJob", fields(unit_id = %job.unit_id))]
    async fn process(&self, job: RenderJob) -> Result<RenderJobAccepted, TransportError> {
        let config = self.config.read().await.clone();
        let signed = SignedObject::new(job, config.secret_bytes())?;

        let request = self
            .http_client
            .post(config.url.clone())
            .timeout(config.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(signed.json)
            .send();

        let response = match tokio::time::timeout(config.timeout, request).await {
            Err(_) => return Err(TransportError::Timeout(config.timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(TransportError::Timeout(config.timeout)),
            Ok(Err(e)) => return Err(TransportError::Unreachable(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Workflow rate limited the render job");
            return Err(TransportError::RateLimited);
        }

        let body = match tokio::time::timeout(config.timeout, response.bytes()).await {
            Err(_) => return Err(TransportError::Timeout(config.timeout)),
            Ok(Err(e)) => return Err(TransportError::Unreachable(e.to_string())),
            Ok(Ok(body)) => body,
        };

        if !status.is_success() {
            let mut body = String::from_utf8_lossy(&body).into_owned();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // Acceptance does not require a body; an unparseable one is ignored.
        let accepted: RenderJobAccepted = serde_json::from_slice(&body).unwrap_or_default();
        debug!(?accepted, "Render job accepted");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_sdk::objects::{Channel, CorrelationIds, UnitKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    fn job() -> RenderJob {
        RenderJob {
            unit_id: Uuid::now_v7(),
            kind: UnitKind::Message,
            channel: Channel::Whatsapp,
            recipient: "+81000000000".to_string(),
            template_key: "remind_schedule".to_string(),
            body: "See you at 10:00".to_string(),
            correlation_ids: CorrelationIds::default(),
        }
    }

    /// Serve one connection: read the request, then answer with `response`
    /// (or never answer when `None`).
    async fn serve_once(response: Option<String>) -> url::Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            match response {
                Some(response) => {
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                None => tokio::time::sleep(Duration::from_secs(30)).await,
            }
        });
        format!("http://{addr}/render").parse().unwrap()
    }

    fn channel(url: url::Url, timeout: Duration) -> WorkflowChannel {
        WorkflowChannel::new(
            reqwest::Client::new(),
            Arc::new(RwLock::new(WorkflowConfig {
                url,
                secret: b"workflow-secret".to_vec().into_boxed_slice(),
                callback_secret: "callback".to_string(),
                timeout,
            })),
        )
    }

    #[tokio::test]
    async fn test_accepted_with_execution_id() {
        let body = r#"{"execution_id":"exec-1"}"#;
        let url = serve_once(Some(format!(
            "HTTP/1.1 202 Accepted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )))
        .await;

        let accepted = channel(url, Duration::from_secs(5))
            .process(job())
            .await
            .unwrap();
        assert_eq!(accepted.execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let url = serve_once(Some(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_string(),
        ))
        .await;

        let err = channel(url, Duration::from_secs(5))
            .process(job())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_rejected() {
        let url = serve_once(Some(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\noops"
                .to_string(),
        ))
        .await;

        let err = channel(url, Duration::from_secs(5))
            .process(job())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected { status: 500, ref body } if body == "oops"
        ));
    }

    #[tokio::test]
    async fn test_silent_workflow_times_out() {
        let url = serve_once(None).await;

        let err = channel(url, Duration::from_millis(200))
            .process(job())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = channel(
            format!("http://{addr}/render").parse().unwrap(),
            Duration::from_secs(5),
        )
        .process(job())
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }
}
