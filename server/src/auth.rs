// Shared-secret authentication for the gated routes

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-Key` header does not match the configured key.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let rejection = match provided {
        Some(key) if keys_match(key, &state.config.api_key) => None,
        Some(_) => Some("Invalid API key attempt"),
        None => Some("Missing API key"),
    };

    match rejection {
        None => next.run(request).await,
        Some(reason) => {
            warn!("{} on {}", reason, request.uri().path());
            ApiError::Unauthorized.into_response()
        }
    }
}

/// Compare without bailing out at the first differing byte.
fn keys_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// First characters of the key, safe to log.
pub fn key_prefix(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secreT", "secret"));
        assert!(!keys_match("secret-longer", "secret"));
        assert!(!keys_match("", "secret"));
    }

    #[test]
    fn test_key_prefix_hides_rest() {
        assert_eq!(key_prefix("abcdefgh"), "abcd...");
        assert_eq!(key_prefix("ab"), "ab...");
    }
}
