use crate::ebay::config::{EbayConfig, EbayCredentials};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;

/// Scope sufficient for the Browse API with an application token.
pub const PUBLIC_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("oauth endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn basic_auth_header(app_id: &str, cert_id: &str) -> String {
    let raw = format!("{app_id}:{cert_id}");
    format!("Basic {}", BASE64.encode(raw))
}

/// Returns a bearer token for the Browse API, minting one when the
/// configuration only carries an application keyset.
pub async fn access_token(http: &Client, config: &EbayConfig) -> Result<String, EbayAuthError> {
    match &config.credentials {
        EbayCredentials::Token(token) => Ok(token.clone()),
        EbayCredentials::ClientCredentials { app_id, cert_id } => {
            get_app_access_token(http, config, app_id, cert_id, &[PUBLIC_SCOPE]).await
        }
    }
}

pub async fn get_app_access_token(
    http: &Client,
    config: &EbayConfig,
    app_id: &str,
    cert_id: &str,
    scopes: &[&str],
) -> Result<String, EbayAuthError> {
    let scope = scopes.join(" ");
    let body = [("grant_type", "client_credentials"), ("scope", scope.as_str())];
    let response = http
        .post(config.oauth_token_url())
        .header(AUTHORIZATION, basic_auth_header(app_id, cert_id))
        .form(&body)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EbayAuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;
    Ok(payload.access_token)
}
