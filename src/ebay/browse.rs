use crate::ebay::auth::{self, EbayAuthError};
use crate::ebay::{EbayConfig, RawListing};
use reqwest::{Client, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error(transparent)]
    Auth(#[from] EbayAuthError),
    #[error("search request failed: {0}")]
    Request(String),
    #[error("search returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("malformed search response: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default, rename = "itemSummaries")]
    item_summaries: Option<Vec<Value>>,
}

/// Browse API client scoped to one seller's items.
#[derive(Clone)]
pub struct BrowseClient {
    http: Client,
    config: Arc<EbayConfig>,
}

impl BrowseClient {
    pub fn new(http: Client, config: Arc<EbayConfig>) -> Self {
        Self { http, config }
    }

    /// Fetches at most `limit` active listings for the seller. Every failure
    /// is logged and reported as an empty page.
    pub async fn fetch_listings(&self, seller_username: &str, limit: u32) -> Vec<RawListing> {
        match self.search_seller(seller_username, limit).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    target = "watch_scout.ebay",
                    seller = seller_username,
                    error = %err,
                    "seller search failed"
                );
                Vec::new()
            }
        }
    }

    pub async fn search_seller(
        &self,
        seller_username: &str,
        limit: u32,
    ) -> Result<Vec<RawListing>, BrowseError> {
        let token = auth::access_token(&self.http, &self.config).await?;
        let filter = format!("sellers:{{{seller_username}}}");
        let limit = limit.to_string();

        info!(
            target = "watch_scout.ebay",
            seller = seller_username,
            limit = %limit,
            marketplace = self.config.marketplace.ebay_code(),
            "fetching seller listings"
        );

        let response = self
            .http
            .get(self.config.search_url())
            .query(&[
                ("q", self.config.search_keyword.as_str()),
                ("filter", filter.as_str()),
                ("limit", limit.as_str()),
            ])
            .bearer_auth(token)
            .header("X-EBAY-C-MARKETPLACE-ID", self.config.marketplace.ebay_code())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BrowseError::Request(err.to_string()))?;
        if !status.is_success() {
            return Err(BrowseError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let payload: SearchResponse =
            serde_json::from_str(&body).map_err(|err| BrowseError::Malformed(err.to_string()))?;

        let items = payload
            .item_summaries
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(idx, value)| match serde_json::from_value::<RawListing>(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(
                        target = "watch_scout.ebay",
                        index = idx,
                        error = %err,
                        "skipping unreadable item summary"
                    );
                    None
                }
            })
            .collect();
        Ok(items)
    }
}
