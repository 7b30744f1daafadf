use crate::ebay::NormalizedListing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use std::time::Duration;

/// Structured investment assessment returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub score: f64,
    pub model_rating: f64,
    pub rarity_rating: f64,
    pub condition_rating: f64,
    pub price_fairness: f64,
    pub investment_comment: String,
}

/// A listing merged field-wise with its score. Only built for listings
/// whose scoring succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredListing {
    #[serde(flatten)]
    pub listing: NormalizedListing,
    #[serde(flatten)]
    pub assessment: ScoreRecord,
}

impl ScoredListing {
    pub fn new(listing: NormalizedListing, assessment: ScoreRecord) -> Self {
        Self {
            listing,
            assessment,
        }
    }

    pub fn score(&self) -> f64 {
        self.assessment.score
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub seller_username: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl ScanRequest {
    pub fn for_seller(seller_username: impl Into<String>) -> Self {
        Self {
            seller_username: seller_username.into(),
            limit: None,
            min_score: None,
        }
    }
}

/// Result of one scan, with counts so an empty `listings` can be told apart
/// from an empty shop or a scoring outage.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub seller_username: String,
    pub fetched: usize,
    pub scored: usize,
    pub failed: usize,
    pub kept: usize,
    pub min_score: f64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub listings: Vec<ScoredListing>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
