//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `SignedBody<T>`: verifies the `Courier-Signature` header against a signed
//!   JSON body for the client named in `Courier-Client` (Service API).
//! - `AdminAuth`: checks `Courier-Admin-Authorization` against the argon2
//!   hash from config (Admin API).
//! - `CallbackAuth`: checks `Courier-Callback-Secret` against the workflow's
//!   callback secret in constant time (Callback API).
//! - `IdempotencyKey`: the optional `Idempotency-Key` header.
//!
//! Each authenticated extractor names the [`Actor`] that idempotency records
//! are scoped to.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use courier_core::entities::idempotency_record::{Actor, ActorKind};
use courier_sdk::signature::{
    ADMIN_AUTH_HEADER, CALLBACK_SECRET_HEADER, CLIENT_HEADER, IDEMPOTENCY_KEY_HEADER,
    SIGNATURE_HEADER, Signature, SignatureError, SignedObject, secrets_match,
};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Largest accepted request body.
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// SignedBody: Service API authentication via signed JSON body
// ---------------------------------------------------------------------------

/// An Axum extractor that verifies the `Courier-Signature` header and
/// deserializes + authenticates the JSON request body.
///
/// # Header format
///
/// ```text
/// Courier-Client:    {client name}
/// Courier-Signature: {unix_timestamp}.{base64_signature}
/// ```
///
/// The signature is computed as `HMAC-SHA256("{timestamp}.{json_body}", client_secret)`.
pub struct SignedBody<T: Signature> {
    pub client: String,
    pub body: T,
}

impl<T: Signature> SignedBody<T> {
    pub fn actor(&self) -> Actor {
        Actor::new(ActorKind::Service, self.client.clone())
    }
}

/// Errors that can occur during signed-body verification.
#[derive(Debug, thiserror::Error)]
pub enum SignedBodyError {
    #[error("missing Courier-Signature header")]
    MissingHeader,
    #[error("missing Courier-Client header")]
    MissingClient,
    #[error("unknown client")]
    UnknownClient,
    #[error("invalid Courier-Signature header format")]
    InvalidHeader,
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("failed to read request body")]
    BodyReadError,
    #[error("invalid JSON body: {0}")]
    JsonError(serde_json::Error),
    #[error("signature verification failed")]
    VerificationFailed,
}

impl From<SignatureError> for SignedBodyError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::Json(e) => Self::JsonError(e),
            SignatureError::SignatureMismatch | SignatureError::Expired => Self::VerificationFailed,
        }
    }
}

impl IntoResponse for SignedBodyError {
    fn into_response(self) -> Response {
        let error = match self {
            SignedBodyError::MissingHeader => ApiError::Unauthorized("missing Courier-Signature header"),
            SignedBodyError::MissingClient => ApiError::Unauthorized("missing Courier-Client header"),
            SignedBodyError::UnknownClient => ApiError::Unauthorized("unknown client"),
            SignedBodyError::VerificationFailed => {
                ApiError::Unauthorized("signature verification failed")
            }
            other => ApiError::Validation(other.to_string()),
        };
        error.into_response()
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<Result<&'a str, ()>> {
    parts
        .headers
        .get(name)
        .map(|value| value.to_str().map_err(|_| ()))
}

impl<T: Signature + Send> FromRequest<AppState> for SignedBody<T> {
    type Rejection = SignedBodyError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        let header_value = header_str(&parts, SIGNATURE_HEADER)
            .ok_or(SignedBodyError::MissingHeader)?
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();
        let client = header_str(&parts, CLIENT_HEADER)
            .ok_or(SignedBodyError::MissingClient)?
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();

        let body_bytes = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|_| SignedBodyError::BodyReadError)?;

        let json =
            String::from_utf8(body_bytes.to_vec()).map_err(|_| SignedBodyError::BodyReadError)?;

        let signed = SignedObject::<T>::from_header_and_body(&header_value, json)?;

        let clients = state.config.clients.read().await;
        let config = clients.get(&client).ok_or(SignedBodyError::UnknownClient)?;
        let verified_body = signed.verify(config.secret_bytes())?;
        drop(clients);

        Ok(SignedBody {
            client,
            body: verified_body,
        })
    }
}

// ---------------------------------------------------------------------------
// AdminAuth: Admin API authentication via plaintext secret header
// ---------------------------------------------------------------------------

/// Verifies `Courier-Admin-Authorization` against the configured argon2 hash.
pub struct AdminAuth;

impl AdminAuth {
    pub fn actor(&self) -> Actor {
        Actor::new(ActorKind::Admin, "admin")
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = header_str(parts, ADMIN_AUTH_HEADER)
            .ok_or(ApiError::Unauthorized("missing Courier-Admin-Authorization header"))?
            .map_err(|_| ApiError::Unauthorized("invalid admin credentials"))?
            .to_owned();

        let admin = state.config.admin.read().await.clone();
        // Argon2 verification is CPU-bound.
        let verified = tokio::task::spawn_blocking(move || admin.verify_secret(&presented))
            .await
            .map_err(|e| ApiError::Internal(format!("admin verification task failed: {e}")))?;

        if !verified {
            tracing::warn!("Rejected admin request with a wrong secret");
            return Err(ApiError::Unauthorized("invalid admin credentials"));
        }
        Ok(AdminAuth)
    }
}

// ---------------------------------------------------------------------------
// CallbackAuth: workflow callbacks via shared secret header
// ---------------------------------------------------------------------------

/// Verifies `Courier-Callback-Secret` against `[workflow] callback_secret`.
pub struct CallbackAuth;

impl CallbackAuth {
    pub fn actor(&self) -> Actor {
        Actor::new(ActorKind::Workflow, "callback")
    }
}

impl FromRequestParts<AppState> for CallbackAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(CALLBACK_SECRET_HEADER)
            .ok_or(ApiError::Unauthorized("missing Courier-Callback-Secret header"))?;

        let workflow = state.config.workflow.read().await;
        let matches = secrets_match(presented.as_bytes(), workflow.callback_secret.as_bytes());
        drop(workflow);

        if !matches {
            tracing::warn!("Rejected callback with a wrong secret");
            return Err(ApiError::Unauthorized("invalid callback secret"));
        }
        Ok(CallbackAuth)
    }
}

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// The `Idempotency-Key` header, if the caller sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

impl IdempotencyKey {
    /// The key, for routes where it is mandatory.
    pub fn required(&self) -> Result<&str, ApiError> {
        self.0
            .as_deref()
            .ok_or_else(|| ApiError::Validation("Idempotency-Key header is required".to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match header_str(parts, IDEMPOTENCY_KEY_HEADER) {
            None => Ok(IdempotencyKey(None)),
            Some(Ok(key)) => Ok(IdempotencyKey(Some(key.to_owned()))),
            Some(Err(())) => Err(ApiError::Validation(
                "Idempotency-Key header must be visible ASCII".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{TEST_ADMIN_SECRET, TEST_CALLBACK_SECRET, test_state};
    use axum::{Router, body::Body, http::StatusCode, routing::post};
    use courier_sdk::objects::UnitRef;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn signed_handler(SignedBody { client, body }: SignedBody<UnitRef>) -> String {
        format!("{client}:{}", body.unit_id)
    }

    async fn admin_handler(auth: AdminAuth) -> String {
        auth.actor().to_string()
    }

    async fn callback_handler(auth: CallbackAuth, key: IdempotencyKey) -> String {
        format!("{} {:?}", auth.actor(), key.0)
    }

    fn router() -> Router {
        Router::new()
            .route("/signed", post(signed_handler))
            .route("/admin", post(admin_handler))
            .route("/callback", post(callback_handler))
            .with_state(test_state())
    }

    async fn send(request: axum::http::Request<Body>) -> (StatusCode, String) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), MAX_BODY_SIZE)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn signed_request(client: &str, secret: &[u8], unit_id: Uuid) -> axum::http::Request<Body> {
        let signed = SignedObject::new(UnitRef { unit_id }, secret).unwrap();
        axum::http::Request::post("/signed")
            .header(SIGNATURE_HEADER, signed.to_header())
            .header(CLIENT_HEADER, client)
            .body(Body::from(signed.json))
            .unwrap()
    }

    #[tokio::test]
    async fn test_signed_body_accepts_known_client() {
        let unit_id = Uuid::now_v7();
        let (status, body) = send(signed_request("crm", b"crm-secret", unit_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("crm:{unit_id}"));
    }

    #[tokio::test]
    async fn test_signed_body_rejects_wrong_secret_and_unknown_client() {
        let unit_id = Uuid::now_v7();
        let (status, _) = send(signed_request("crm", b"not-the-secret", unit_id)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(signed_request("stranger", b"crm-secret", unit_id)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("unknown client"));
    }

    #[tokio::test]
    async fn test_signed_body_requires_headers() {
        let request = axum::http::Request::post("/signed")
            .header(CLIENT_HEADER, "crm")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = axum::http::Request::post("/signed")
            .header(CLIENT_HEADER, "crm")
            .header(SIGNATURE_HEADER, "not-a-signature")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_auth() {
        let request = axum::http::Request::post("/admin")
            .header(ADMIN_AUTH_HEADER, TEST_ADMIN_SECRET)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin:admin");

        let request = axum::http::Request::post("/admin")
            .header(ADMIN_AUTH_HEADER, "guess")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = axum::http::Request::post("/admin")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_auth_and_idempotency_key() {
        let request = axum::http::Request::post("/callback")
            .header(CALLBACK_SECRET_HEADER, TEST_CALLBACK_SECRET)
            .header(IDEMPOTENCY_KEY_HEADER, "delivery-42")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"workflow:callback Some("delivery-42")"#);

        let request = axum::http::Request::post("/callback")
            .header(CALLBACK_SECRET_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_ascii_key_is_a_json_validation_error() {
        let request = axum::http::Request::post("/callback")
            .header(CALLBACK_SECRET_HEADER, TEST_CALLBACK_SECRET)
            .header(
                IDEMPOTENCY_KEY_HEADER,
                axum::http::HeaderValue::from_bytes(b"caf\xc3\xa9").unwrap(),
            )
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: courier_sdk::objects::ErrorBody = serde_json::from_str(&body).unwrap();
        assert_eq!(body.error, "validation");
        assert!(body.message.contains("Idempotency-Key"));
    }

    #[test]
    fn test_required_key() {
        assert!(IdempotencyKey(None).required().is_err());
        assert_eq!(IdempotencyKey(Some("k".into())).required().unwrap(), "k");
    }
}
