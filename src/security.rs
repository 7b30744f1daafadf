use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{info, warn};

/// API keys accepted on the scan routes, mapped to a caller label.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, String>>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub caller: String,
}

impl AuthState {
    pub fn new(pairs: &[(String, String)]) -> Self {
        let keys: HashMap<String, String> = pairs
            .iter()
            .map(|(label, key)| (key.clone(), label.clone()))
            .collect();
        if keys.is_empty() {
            warn!(
                target = "watch_scout.api",
                "no SCAN_API_KEYS configured; scan routes will reject every request"
            );
        } else {
            info!(
                target = "watch_scout.api",
                key_count = keys.len(),
                "loaded scan API keys"
            );
        }
        Self {
            keys: Arc::new(keys),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).map(|caller| AuthContext {
            caller: caller.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Scan-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// `Authorization: Bearer <key>` wins; an empty or non-bearer value falls
/// through to `X-Scan-Key`.
fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .or_else(|| {
            headers
                .get("X-Scan-Key")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(str::to_string)
}

fn bearer_token(raw: &str) -> Option<&str> {
    let (scheme, token) = raw.trim_start().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}
