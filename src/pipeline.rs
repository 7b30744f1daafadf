use crate::config::{AppConfig, MAX_PAGE_LIMIT, ScanSettings};
use crate::ebay::{BrowseClient, normalize};
use crate::http::build_client;
use crate::llm::LlmClient;
use crate::models::{ScanOutcome, ScanRequest, ScoredListing};
use crate::scoring::InvestmentScorer;
use chrono::Utc;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fetch → normalize → score → filter, one listing at a time.
#[derive(Clone)]
pub struct Pipeline {
    pub settings: Arc<ScanSettings>,
    browse: BrowseClient,
    scorer: InvestmentScorer,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = build_client(&config.http)?;
        let browse = BrowseClient::new(http.clone(), Arc::new(config.ebay.clone()));
        let llm = LlmClient::new(http, config.llm.clone());
        Ok(Self {
            settings: Arc::new(config.scan.clone()),
            browse,
            scorer: InvestmentScorer::new(Arc::new(llm)),
        })
    }

    pub async fn run(&self, request: ScanRequest) -> Result<ScanOutcome, PipelineError> {
        self.run_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Runs one scan. Cancellation stops before the next listing and the
    /// outcome carries whatever was scored so far.
    pub async fn run_with_cancel(
        &self,
        request: ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, PipelineError> {
        let seller = request.seller_username.trim().to_string();
        if seller.is_empty() {
            return Err(PipelineError::invalid_input(
                "fetch",
                "seller_username must not be empty",
            ));
        }
        let limit = request
            .limit
            .unwrap_or(self.settings.page_limit)
            .clamp(1, MAX_PAGE_LIMIT);
        let min_score = request.min_score.unwrap_or(self.settings.min_score);
        if !min_score.is_finite() {
            return Err(PipelineError::invalid_input(
                "filter",
                "min_score must be a finite number",
            ));
        }

        let started_at = Utc::now();
        let started = Instant::now();

        let raw_items = self.browse.fetch_listings(&seller, limit).await;
        crate::metrics::stage_elapsed("fetch", started.elapsed());
        let fetched = raw_items.len();

        let mut pacer = self.settings.pacing.pacer();
        let mut results = Vec::new();
        let mut failed = 0usize;
        let mut cancelled = false;

        for (idx, item) in raw_items.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let normalized = normalize(item);
            match self.scorer.score(&normalized).await {
                Some(assessment) => {
                    crate::metrics::scan_item("scored");
                    results.push(ScoredListing::new(normalized, assessment));
                }
                None => {
                    crate::metrics::scan_item("dropped");
                    failed += 1;
                }
            }
            let has_next = idx + 1 < fetched;
            if has_next && !pacer.wait(cancel).await {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            warn!(
                target = "watch_scout.scan",
                seller = %seller,
                processed = results.len() + failed,
                fetched,
                "scan cancelled"
            );
        }

        let scored = results.len();
        let listings = stages::filter_top(results, min_score);
        let elapsed = started.elapsed();
        crate::metrics::stage_elapsed("scan", elapsed);

        info!(
            target = "watch_scout.scan",
            seller = %seller,
            fetched,
            scored,
            failed,
            kept = listings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scan finished"
        );

        Ok(ScanOutcome {
            seller_username: seller,
            fetched,
            scored,
            failed,
            kept: listings.len(),
            min_score,
            cancelled,
            started_at,
            elapsed,
            listings,
        })
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

pub mod stages {
    use crate::models::ScoredListing;

    /// Keeps listings scoring at least `min_score`, in input order.
    pub fn filter_top(listings: Vec<ScoredListing>, min_score: f64) -> Vec<ScoredListing> {
        listings
            .into_iter()
            .filter(|listing| listing.score() >= min_score)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::config_for;
    use crate::ebay::NormalizedListing;
    use crate::models::ScoreRecord;
    use crate::pacing::PacingPolicy;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const SEARCH_PATH: &str = "/buy/browse/v1/item_summary/search";
    const CHAT_PATH: &str = "/v1/chat/completions";

    fn scored(title: &str, score: f64) -> ScoredListing {
        ScoredListing::new(
            NormalizedListing {
                title: title.into(),
                ..NormalizedListing::default()
            },
            ScoreRecord {
                score,
                model_rating: score,
                rarity_rating: score,
                condition_rating: score,
                price_fairness: score,
                investment_comment: format!("{title} comment"),
            },
        )
    }

    fn reply(score: f64) -> serde_json::Value {
        let content = json!({
            "score": score,
            "model_rating": 8.0,
            "rarity_rating": 8.0,
            "condition_rating": 8.0,
            "price_fairness": 8.0,
            "investment_comment": "ok"
        })
        .to_string();
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn items(titles: &[&str]) -> serde_json::Value {
        let summaries: Vec<_> = titles
            .iter()
            .enumerate()
            .map(|(idx, title)| {
                json!({
                    "itemId": format!("item-{}", idx + 1),
                    "title": title,
                    "price": {"value": "10000.00", "currency": "USD"},
                    "condition": "Pre-owned"
                })
            })
            .collect();
        json!({"itemSummaries": summaries})
    }

    fn pipeline(server: &MockServer) -> Pipeline {
        Pipeline::new(&config_for(&server.base_url(), &server.url(CHAT_PATH))).expect("pipeline")
    }

    #[test]
    fn filter_keeps_threshold_and_order() {
        let input = vec![
            scored("a", 9.0),
            scored("b", 8.49),
            scored("c", 8.5),
            scored("d", 10.0),
            scored("e", 0.0),
        ];
        let titles: Vec<String> = stages::filter_top(input, 8.5)
            .into_iter()
            .map(|l| l.listing.title)
            .collect();
        assert_eq!(titles, vec!["a", "c", "d"]);
    }

    #[test]
    fn filter_empty_is_empty() {
        assert!(stages::filter_top(Vec::new(), 8.5).is_empty());
    }

    #[tokio::test]
    async fn seller_without_listings_makes_no_scoring_calls() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(200).json_body(json!({"total": 0}));
            })
            .await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH);
                then.status(200).json_body(reply(9.0));
            })
            .await;

        let outcome = pipeline(&server)
            .run(ScanRequest::for_seller("empty_shop"))
            .await
            .expect("scan");
        assert!(outcome.listings.is_empty());
        assert_eq!(outcome.fetched, 0);
        chat.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn keeps_only_high_scores_in_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(200)
                    .json_body(items(&["Submariner", "Oyster Perpetual", "Daytona"]));
            })
            .await;
        for (title, score) in [("Submariner", 9.0), ("Oyster Perpetual", 7.0), ("Daytona", 8.6)] {
            server
                .mock_async(|when, then| {
                    when.method(POST).path(CHAT_PATH).body_contains(title);
                    then.status(200).json_body(reply(score));
                })
                .await;
        }

        let outcome = pipeline(&server)
            .run(ScanRequest::for_seller("watchdealer"))
            .await
            .expect("scan");
        let titles: Vec<&str> = outcome
            .listings
            .iter()
            .map(|l| l.listing.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Submariner", "Daytona"]);
        assert_eq!(outcome.fetched, 3);
        assert_eq!(outcome.scored, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.listings[0].listing.item_id.as_deref(), Some("item-1"));
        assert_eq!(outcome.listings[1].score(), 8.6);
    }

    #[tokio::test]
    async fn search_failure_yields_empty_scan() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(500).body("boom");
            })
            .await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH);
                then.status(200).json_body(reply(9.0));
            })
            .await;

        let outcome = pipeline(&server)
            .run(ScanRequest::for_seller("watchdealer"))
            .await
            .expect("scan");
        assert!(outcome.listings.is_empty());
        assert_eq!(outcome.fetched, 0);
        chat.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn invalid_reply_drops_only_that_item() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(200)
                    .json_body(items(&["Sea-Dweller", "Yacht-Master", "Milgauss"]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH).body_contains("Sea-Dweller");
                then.status(200).json_body(reply(9.2));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH).body_contains("Yacht-Master");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"score\": 9.5, \"model_rat"}}]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH).body_contains("Milgauss");
                then.status(200).json_body(reply(8.9));
            })
            .await;

        let outcome = pipeline(&server)
            .run(ScanRequest::for_seller("watchdealer"))
            .await
            .expect("scan");
        let titles: Vec<&str> = outcome
            .listings
            .iter()
            .map(|l| l.listing.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Sea-Dweller", "Milgauss"]);
        assert_eq!(outcome.scored, 2);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn pacing_waits_between_items_but_not_after_last() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(200)
                    .json_body(items(&["Explorer", "Datejust", "Day-Date"]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH).body_contains("Datejust");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "not json"}}]
                }));
            })
            .await;
        for title in ["Explorer", "Day-Date"] {
            server
                .mock_async(|when, then| {
                    when.method(POST).path(CHAT_PATH).body_contains(title);
                    then.status(200).json_body(reply(9.0));
                })
                .await;
        }
        let mut config = config_for(&server.base_url(), &server.url(CHAT_PATH));
        config.scan.pacing = PacingPolicy::Fixed {
            delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
        };

        let started = Instant::now();
        let outcome = Pipeline::new(&config)
            .expect("pipeline")
            .run(ScanRequest::for_seller("watchdealer"))
            .await
            .expect("scan");
        let elapsed = started.elapsed();

        assert_eq!(outcome.scored, 2);
        assert_eq!(outcome.failed, 1);
        // Two waits: after the first and after the failed second call.
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
    }

    #[tokio::test]
    async fn overrides_apply_per_request() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH).query_param("limit", "3");
                then.status(200).json_body(items(&["Air-King"]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH);
                then.status(200).json_body(reply(6.0));
            })
            .await;

        let outcome = pipeline(&server)
            .run(ScanRequest {
                seller_username: "watchdealer".into(),
                limit: Some(3),
                min_score: Some(5.0),
            })
            .await
            .expect("scan");
        search.assert_async().await;
        assert_eq!(outcome.kept, 1);
        assert_eq!(outcome.min_score, 5.0);
    }

    #[tokio::test]
    async fn blank_seller_is_rejected() {
        let server = MockServer::start_async().await;
        let err = pipeline(&server)
            .run(ScanRequest::for_seller("   "))
            .await
            .expect_err("should fail");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn cancelled_scan_stops_before_scoring() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(SEARCH_PATH);
                then.status(200).json_body(items(&["Cellini", "Sky-Dweller"]));
            })
            .await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH);
                then.status(200).json_body(reply(9.0));
            })
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = pipeline(&server)
            .run_with_cancel(ScanRequest::for_seller("watchdealer"), &cancel)
            .await
            .expect("scan");
        assert!(outcome.cancelled);
        assert_eq!(outcome.fetched, 2);
        assert!(outcome.listings.is_empty());
        chat.assert_hits_async(0).await;
    }
}
