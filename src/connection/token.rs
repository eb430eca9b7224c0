//! Token lifetime handling.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Remaining lifetime of a JWT according to its `exp` claim.
///
/// Returns `None` for tokens that are not JWTs or carry no `exp`. A token that
/// has already expired yields a zero duration.
pub fn jwt_expires_in(token: &str) -> Option<Duration> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;
    let now = chrono::Utc::now().timestamp();
    Some(Duration::from_secs((claims.exp - now).max(0) as u64))
}

/// How long to wait before refreshing a token with the given lifetime.
pub fn refresh_delay(lifetime: Duration, ratio: f64) -> Duration {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.8 };
    lifetime.mul_f64(ratio)
}

#[cfg(test)]
pub(crate) fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{},"server_uuid":"x"}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
