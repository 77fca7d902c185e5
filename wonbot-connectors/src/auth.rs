//! Upbit request authentication.
//!
//! Upbit authenticates private endpoints with a JWT bearer token
//! signed HS256 with the API secret. Requests that carry parameters
//! additionally embed a SHA512 hash of the exact encoded query string,
//! which Upbit validates against the query it receives.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while building an auth token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Failed to build signature: {0}")]
    Signature(String),

    #[error("Failed to serialize token payload: {0}")]
    Payload(String),
}

#[derive(Serialize)]
struct TokenPayload<'a> {
    access_key: &'a str,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<&'static str>,
}

/// Percent-encode a query component. Unreserved characters pass
/// through; everything else is encoded, matching what Upbit hashes.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            },
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Build the encoded query string in parameter order.
///
/// The same string must be used both for the request URL and for the
/// query hash, otherwise Upbit rejects the signature.
pub fn build_query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// SHA512 hex digest of the encoded query string.
fn build_query_hash(query_string: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(query_string.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a signed JWT bearer token for an Upbit private request.
///
/// `query_string` must be exactly the string appended to the URL, or
/// `None` for requests without parameters.
pub fn create_jwt_token(
    access_key: &str,
    secret_key: &str,
    query_string: Option<&str>,
) -> Result<String, AuthError> {
    let payload = TokenPayload {
        access_key,
        nonce: Uuid::new_v4().to_string(),
        query_hash: query_string.map(build_query_hash),
        query_hash_alg: query_string.map(|_| "SHA512"),
    };

    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload_json =
        serde_json::to_vec(&payload).map_err(|e| AuthError::Payload(e.to_string()))?;
    let claims = URL_SAFE_NO_PAD.encode(payload_json);

    let signing_input = format!("{header}.{claims}");
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| AuthError::Signature(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

// =============================================================================
// Tests
// =============================================================================
