//! Shared-secret check for webhook deliveries
//!
//! TradingView alerts cannot set custom headers, so the secret is accepted
//! either in `X-Webhook-Token` or as a `token` query parameter.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const TOKEN_HEADER: &str = "x-webhook-token";

/// The token presented by the caller; the header wins over the query string
pub fn presented_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query_token)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Compare over SHA-256 digests so timing does not depend on secret length
/// or on the position of the first differing byte
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());

    expected
        .iter()
        .zip(presented.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
