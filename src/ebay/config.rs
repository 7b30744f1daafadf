use crate::config::{ConfigError, Lookup};
use serde::{Deserialize, Serialize};

const PRODUCTION_ROOT: &str = "https://api.ebay.com";
const SANDBOX_ROOT: &str = "https://api.sandbox.ebay.com";

#[derive(Debug, Clone)]
pub struct EbayConfig {
    /// API root without trailing slash, e.g. `https://api.ebay.com`.
    pub root: String,
    pub marketplace: MarketplaceId,
    pub search_keyword: String,
    pub credentials: EbayCredentials,
    /// Recorded for completeness; the Browse API never asks for it.
    pub dev_id: Option<String>,
}

/// How the fetcher authenticates against the Browse API.
#[derive(Clone)]
pub enum EbayCredentials {
    /// Pre-issued OAuth bearer token.
    Token(String),
    /// Application keyset used to mint a token per scan.
    ClientCredentials { app_id: String, cert_id: String },
}

impl std::fmt::Debug for EbayCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::ClientCredentials { app_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("app_id", app_id)
                .finish_non_exhaustive(),
        }
    }
}

impl EbayConfig {
    pub fn from_lookup(env: &Lookup<'_>) -> Result<Self, ConfigError> {
        let credentials = match env.get("EBAY_OAUTH_TOKEN") {
            Some(token) => EbayCredentials::Token(token),
            None => match (env.get("EBAY_APP_ID"), env.get("EBAY_CERT_ID")) {
                (Some(app_id), Some(cert_id)) => {
                    EbayCredentials::ClientCredentials { app_id, cert_id }
                }
                (Some(_), None) => return Err(ConfigError::Missing("EBAY_CERT_ID")),
                _ => return Err(ConfigError::Missing("EBAY_OAUTH_TOKEN")),
            },
        };

        let root = match env.get("EBAY_API_ROOT") {
            Some(root) => root.trim_end_matches('/').to_string(),
            None => {
                let sandbox = env
                    .get("EBAY_ENV")
                    .map(|value| value.eq_ignore_ascii_case("SANDBOX"))
                    .unwrap_or(false);
                if sandbox { SANDBOX_ROOT } else { PRODUCTION_ROOT }.to_string()
            }
        };

        let marketplace = match env.get("EBAY_MARKETPLACE_ID") {
            Some(raw) => MarketplaceId::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "EBAY_MARKETPLACE_ID",
                reason: format!("unsupported marketplace `{raw}`"),
            })?,
            None => MarketplaceId::default(),
        };

        Ok(Self {
            root,
            marketplace,
            search_keyword: env
                .get("EBAY_SEARCH_KEYWORD")
                .unwrap_or_else(|| "rolex".to_string()),
            credentials,
            dev_id: env.get("EBAY_DEV_ID"),
        })
    }

    pub fn search_url(&self) -> String {
        format!("{}/buy/browse/v1/item_summary/search", self.root)
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names)]
pub enum MarketplaceId {
    #[default]
    EbayUs,
    EbayUk,
    EbayDe,
}

impl MarketplaceId {
    /// Value for the `X-EBAY-C-MARKETPLACE-ID` header.
    pub fn ebay_code(&self) -> &'static str {
        match self {
            MarketplaceId::EbayUs => "EBAY_US",
            MarketplaceId::EbayUk => "EBAY_GB",
            MarketplaceId::EbayDe => "EBAY_DE",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "EBAY_US" => Some(MarketplaceId::EbayUs),
            "EBAY_GB" | "EBAY_UK" => Some(MarketplaceId::EbayUk),
            "EBAY_DE" => Some(MarketplaceId::EbayDe),
            _ => None,
        }
    }
}
