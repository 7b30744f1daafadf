use crate::ebay::NormalizedListing;
use crate::llm::{LlmClient, LlmError, LlmMessage};
use crate::models::ScoreRecord;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const PROMPT_TEMPLATE: &str = r#"
You are a Rolex investment expert. Analyze the following watch and return ONLY structured JSON.

Listing:
{listing}

Return JSON with EXACTLY these fields:
{
  "score": float (0-10),
  "model_rating": float,
  "rarity_rating": float,
  "condition_rating": float,
  "price_fairness": float,
  "investment_comment": "short explanation"
}
"#;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("reply is not a score record: {reason} | raw: {raw}")]
    Malformed { reason: String, raw: String },
    #[error("score {score} outside 0-10 | raw: {raw}")]
    OutOfRange { score: f64, raw: String },
}

/// Asks the model for an investment assessment of one listing.
#[derive(Clone)]
pub struct InvestmentScorer {
    llm: Arc<LlmClient>,
}

impl InvestmentScorer {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Scores a listing, or returns `None` after logging why it could not.
    /// Callers drop the listing on `None`.
    pub async fn score(&self, listing: &NormalizedListing) -> Option<ScoreRecord> {
        match self.try_score(listing).await {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    target = "watch_scout.llm",
                    item_id = listing.item_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "investment scoring failed"
                );
                None
            }
        }
    }

    pub async fn try_score(&self, listing: &NormalizedListing) -> Result<ScoreRecord, ScoreError> {
        let prompt = build_prompt(listing);
        let response = self.llm.chat(&[LlmMessage::user(prompt)]).await?;
        let usage = response.usage.as_ref();
        debug!(
            target = "watch_scout.llm",
            item_id = listing.item_id.as_deref().unwrap_or("-"),
            reply_len = response.text.len(),
            prompt_tokens = usage.and_then(|u| u.prompt_tokens),
            completion_tokens = usage.and_then(|u| u.completion_tokens),
            "score reply received"
        );
        parse_score_reply(&response.text)
    }
}

pub fn build_prompt(listing: &NormalizedListing) -> String {
    let rendered = serde_json::to_string_pretty(listing).unwrap_or_else(|_| listing.title.clone());
    PROMPT_TEMPLATE.replacen("{listing}", &rendered, 1)
}

/// Decodes the model reply as strict JSON. The text is data only; anything
/// that is not a complete score object is rejected.
pub fn parse_score_reply(text: &str) -> Result<ScoreRecord, ScoreError> {
    let cleaned = strip_markdown_fence(text);
    let record: ScoreRecord =
        serde_json::from_str(&cleaned).map_err(|err| ScoreError::Malformed {
            reason: err.to_string(),
            raw: text.to_string(),
        })?;
    let ratings = [
        record.model_rating,
        record.rarity_rating,
        record.condition_rating,
        record.price_fairness,
    ];
    if !record.score.is_finite() || !(0.0..=10.0).contains(&record.score) {
        return Err(ScoreError::OutOfRange {
            score: record.score,
            raw: text.to_string(),
        });
    }
    if ratings.iter().any(|value| !value.is_finite()) {
        return Err(ScoreError::Malformed {
            reason: "non-finite rating".into(),
            raw: text.to_string(),
        });
    }
    Ok(record)
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}
