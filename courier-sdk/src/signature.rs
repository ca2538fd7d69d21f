//! Signature algorithm and credential headers for all Courier APIs.
//!
//! Service API requests and outbound render jobs use HMAC-SHA256 body
//! signatures. The wire format for the header is:
//!
//! ```text
//! Courier-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{timestamp}.{json_body}", secret)`.
//!
//! Callbacks from the workflow engine carry a plain shared secret in
//! [`CALLBACK_SECRET_HEADER`], which must be compared with
//! [`secrets_match`] so the comparison runs in constant time.

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Courier-Signature";

/// Header naming the calling service client (selects the signing secret).
pub const CLIENT_HEADER: &str = "Courier-Client";

/// Header name for admin API authentication (plaintext secret).
pub const ADMIN_AUTH_HEADER: &str = "Courier-Admin-Authorization";

/// Header carrying the shared secret on workflow callbacks.
pub const CALLBACK_SECRET_HEADER: &str = "Courier-Callback-Secret";

/// Caller-supplied token scoping one logical attempt of a mutating request.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Set to `true` on responses served from the idempotency ledger.
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker trait for types that can participate in body signing via
/// [`SignedObject`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// SignedObject: body signing
// ---------------------------------------------------------------------------

/// A signed body carrying its typed payload, timestamp, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedObject<T> {
    /// Serialize `body` to JSON, compute
    /// `HMAC-SHA256("{timestamp}.{json}", key)`, and return the assembled
    /// [`SignedObject`].
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let json = serde_json::to_string(&body)?;
        let signature = sign_body(now, &json, key);
        Ok(Self {
            body,
            timestamp: now,
            json,
            signature,
        })
    }

    /// Reconstruct a [`SignedObject`] from a raw `Courier-Signature` header
    /// value and the JSON request body string.
    ///
    /// This parses the header and deserializes the body but does **not**
    /// verify the HMAC. Call [`verify`](Self::verify) for that.
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            timestamp,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC signature and timestamp freshness, consuming `self`
    /// and returning the authenticated payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let data = format!("{}.{}", self.timestamp, self.json);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp)?;
        Ok(self.body)
    }

    /// Format the full `Courier-Signature` header value (`{timestamp}.{b64}`).
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

fn sign_body(timestamp: i64, json: &str, key: &[u8]) -> Box<[u8]> {
    let data = format!("{timestamp}.{json}");
    let signature = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    signature.as_ref().to_owned().into_boxed_slice()
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Parse a `Courier-Signature` header value (`{timestamp}.{base64}`) into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared-secret comparison
// ---------------------------------------------------------------------------

/// Compare a presented secret against the expected one in constant time.
///
/// Both sides are reduced to an HMAC tag under a per-call random key and the
/// tags are checked with [`ring::hmac::verify`], so neither the length nor
/// the contents of the expected secret leak through timing.
pub fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    let rng = ring::rand::SystemRandom::new();
    let Ok(key) = ring::hmac::Key::generate(ring::hmac::HMAC_SHA256, &rng) else {
        return false;
    };
    let expected_tag = ring::hmac::sign(&key, expected);
    ring::hmac::verify(&key, presented, expected_tag.as_ref()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        unit: String,
    }

    impl Signature for Ping {}

    #[test]
    fn test_signed_object_roundtrip_through_header() {
        let signed = SignedObject::new(
            Ping {
                unit: "u-1".into(),
            },
            b"client-secret",
        )
        .unwrap();
        let header = signed.to_header();

        let parsed = SignedObject::<Ping>::from_header_and_body(&header, signed.json.clone()).unwrap();
        let body = parsed.verify(b"client-secret").unwrap();
        assert_eq!(body.unit, "u-1");
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let signed = SignedObject::new(Ping { unit: "x".into() }, b"a").unwrap();
        let parsed =
            SignedObject::<Ping>::from_header_and_body(&signed.to_header(), signed.json).unwrap();
        assert!(matches!(
            parsed.verify(b"b"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_expired_signature_is_rejected() {
        let json = r#"{"unit":"x"}"#.to_string();
        let stale = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let signature = sign_body(stale, &json, b"k");
        let header = format_signature_header(stale, &signature);
        let parsed = SignedObject::<Ping>::from_header_and_body(&header, json).unwrap();
        assert!(matches!(parsed.verify(b"k"), Err(SignatureError::Expired)));
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            parse_signature_header("no-dot-here"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("abc.def"),
            Err(SignatureError::InvalidFormat)
        ));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match(b"shared", b"shared"));
        assert!(!secrets_match(b"shared", b"shared-but-longer"));
        assert!(!secrets_match(b"", b"shared"));
    }
}
