use crate::ebay::EbayConfig;
use crate::http::HttpSettings;
use crate::llm::LlmConfig;
use crate::notifications::NotificationConfig;
use crate::pacing::PacingPolicy;
use std::{str::FromStr, time::Duration};
use thiserror::Error;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;
pub const DEFAULT_MIN_SCORE: f64 = 8.5;
const DEFAULT_PACING_MS: u64 = 1200;
const DEFAULT_JOB_RETENTION_SECS: u64 = 900;
/// Slowest accepted bucket refill; one call every ~17 minutes.
const MIN_PACING_RATE_PER_SEC: f64 = 0.001;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Everything the service needs, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ebay: EbayConfig,
    pub llm: LlmConfig,
    pub notifications: NotificationConfig,
    pub scan: ScanSettings,
    pub http: HttpSettings,
    pub api_keys: Vec<(String, String)>,
    pub port: u16,
    pub queue_capacity: usize,
    /// How long a finished background job stays queryable.
    pub job_retention: Duration,
    pub body_limit: usize,
    pub metrics_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub page_limit: u32,
    pub min_score: f64,
    pub pacing: PacingPolicy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            min_score: DEFAULT_MIN_SCORE,
            pacing: PacingPolicy::Fixed {
                delay: Duration::from_millis(DEFAULT_PACING_MS),
                jitter: Duration::ZERO,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);
        let ebay = EbayConfig::from_lookup(&env)?;
        let llm = LlmConfig::from_lookup(&env)?;
        let notifications = NotificationConfig::from_lookup(&env);
        let scan = ScanSettings {
            page_limit: env
                .parse::<u32>("SCAN_PAGE_LIMIT")?
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
            min_score: finite(
                "SCAN_MIN_SCORE",
                env.parse::<f64>("SCAN_MIN_SCORE")?
                    .unwrap_or(DEFAULT_MIN_SCORE),
            )?,
            pacing: pacing_from_env(&env)?,
        };
        let http = HttpSettings {
            timeout: Duration::from_secs(env.parse("HTTP_TIMEOUT_SECS")?.unwrap_or(20)),
            connect_timeout: Duration::from_secs(
                env.parse("HTTP_CONNECT_TIMEOUT_SECS")?.unwrap_or(5),
            ),
        };

        Ok(Self {
            ebay,
            llm,
            notifications,
            scan,
            http,
            api_keys: parse_api_keys(env.get("SCAN_API_KEYS").as_deref().unwrap_or("")),
            port: env.parse("PORT")?.unwrap_or(8000),
            queue_capacity: env
                .parse::<usize>("QUEUE_CAPACITY")?
                .filter(|v| *v > 0)
                .unwrap_or(16),
            job_retention: Duration::from_secs(
                env.parse("SCAN_JOB_RETENTION_SECS")?
                    .unwrap_or(DEFAULT_JOB_RETENTION_SECS),
            ),
            body_limit: env
                .parse::<usize>("REQUEST_MAX_BYTES")?
                .filter(|v| *v > 0)
                .unwrap_or(256 * 1024),
            metrics_key: env.get("METRICS_KEY"),
        })
    }
}

/// Thin wrapper over a key lookup that treats blank values as unset.
pub struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    pub fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    pub fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|err| ConfigError::Invalid {
                    key,
                    reason: err.to_string(),
                }),
            None => Ok(None),
        }
    }
}

fn pacing_from_env(env: &Lookup<'_>) -> Result<PacingPolicy, ConfigError> {
    let mode = env
        .get("SCAN_PACING")
        .unwrap_or_else(|| "fixed".to_string())
        .to_lowercase();
    match mode.as_str() {
        "fixed" => Ok(PacingPolicy::Fixed {
            delay: Duration::from_millis(env.parse("SCAN_PACING_MS")?.unwrap_or(DEFAULT_PACING_MS)),
            jitter: Duration::from_millis(env.parse("SCAN_PACING_JITTER_MS")?.unwrap_or(0)),
        }),
        "token_bucket" => {
            let rate_per_sec = finite(
                "SCAN_PACING_RATE_PER_SEC",
                env.parse::<f64>("SCAN_PACING_RATE_PER_SEC")?.unwrap_or(1.0),
            )?;
            let capacity = finite(
                "SCAN_PACING_CAPACITY",
                env.parse::<f64>("SCAN_PACING_CAPACITY")?.unwrap_or(1.0),
            )?;
            if rate_per_sec < MIN_PACING_RATE_PER_SEC {
                return Err(ConfigError::Invalid {
                    key: "SCAN_PACING_RATE_PER_SEC",
                    reason: format!("must be at least {MIN_PACING_RATE_PER_SEC}"),
                });
            }
            if capacity < 1.0 {
                return Err(ConfigError::Invalid {
                    key: "SCAN_PACING_CAPACITY",
                    reason: "must be at least 1".into(),
                });
            }
            Ok(PacingPolicy::TokenBucket {
                rate_per_sec,
                capacity,
            })
        }
        "none" => Ok(PacingPolicy::Immediate),
        other => Err(ConfigError::Invalid {
            key: "SCAN_PACING",
            reason: format!("unknown pacing mode `{other}`"),
        }),
    }
}

/// `f64::from_str` accepts `NaN` and `inf`; neither is a usable setting.
fn finite(key: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: "must be a finite number".into(),
        })
    }
}

/// Parses `label:key` pairs separated by commas. Malformed entries are skipped.
fn parse_api_keys(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|token| {
            let (label, key) = token.trim().split_once(':')?;
            let (label, key) = (label.trim(), key.trim());
            if label.is_empty() || key.is_empty() {
                tracing::warn!(
                    target = "watch_scout.api",
                    "ignored malformed SCAN_API_KEYS entry"
                );
                return None;
            }
            Some((label.to_string(), key.to_string()))
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::config::EbayCredentials;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_openai_key_is_fatal() {
        let err = AppConfig::from_lookup(lookup_from(&[("EBAY_OAUTH_TOKEN", "t")]))
            .expect_err("should fail");
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn missing_marketplace_credentials_is_fatal() {
        let err = AppConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "k")]))
            .expect_err("should fail");
        assert_eq!(err, ConfigError::Missing("EBAY_OAUTH_TOKEN"));
    }

    #[test]
    fn app_credentials_stand_in_for_token() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "k"),
            ("EBAY_APP_ID", "app"),
            ("EBAY_CERT_ID", "cert"),
        ]))
        .expect("config");
        assert!(matches!(
            config.ebay.credentials,
            EbayCredentials::ClientCredentials { .. }
        ));
    }

    #[test]
    fn defaults_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "k"),
            ("EBAY_OAUTH_TOKEN", "t"),
        ]))
        .expect("config");
        assert_eq!(config.scan.page_limit, 50);
        assert_eq!(config.scan.min_score, 8.5);
        assert_eq!(config.port, 8000);
        assert_eq!(config.ebay.root, "https://api.ebay.com");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.api_keys.is_empty());
        assert_eq!(
            config.scan.pacing,
            PacingPolicy::Fixed {
                delay: Duration::from_millis(1200),
                jitter: Duration::ZERO
            }
        );
    }

    #[test]
    fn page_limit_is_clamped() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "k"),
            ("EBAY_OAUTH_TOKEN", "t"),
            ("SCAN_PAGE_LIMIT", "900"),
        ]))
        .expect("config");
        assert_eq!(config.scan.page_limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "k"),
            ("EBAY_OAUTH_TOKEN", "t"),
            ("SCAN_MIN_SCORE", "high"),
        ]))
        .expect_err("should fail");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "SCAN_MIN_SCORE",
                ..
            }
        ));
    }

    #[test]
    fn unknown_pacing_mode_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "k"),
            ("EBAY_OAUTH_TOKEN", "t"),
            ("SCAN_PACING", "adaptive"),
        ]))
        .expect_err("should fail");
        assert!(matches!(err, ConfigError::Invalid { key: "SCAN_PACING", .. }));
    }

    #[test]
    fn non_finite_numbers_rejected() {
        for (key, value) in [
            ("SCAN_MIN_SCORE", "NaN"),
            ("SCAN_MIN_SCORE", "inf"),
            ("SCAN_PACING_CAPACITY", "inf"),
        ] {
            let err = AppConfig::from_lookup(lookup_from(&[
                ("OPENAI_API_KEY", "k"),
                ("EBAY_OAUTH_TOKEN", "t"),
                ("SCAN_PACING", "token_bucket"),
                (key, value),
            ]))
            .expect_err("should fail");
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{key}={value}: {err:?}"
            );
        }
    }

    #[test]
    fn tiny_bucket_rate_rejected() {
        for rate in ["1e-300", "0", "-2", "NaN"] {
            let err = AppConfig::from_lookup(lookup_from(&[
                ("OPENAI_API_KEY", "k"),
                ("EBAY_OAUTH_TOKEN", "t"),
                ("SCAN_PACING", "token_bucket"),
                ("SCAN_PACING_RATE_PER_SEC", rate),
            ]))
            .expect_err("should fail");
            assert!(
                matches!(
                    err,
                    ConfigError::Invalid {
                        key: "SCAN_PACING_RATE_PER_SEC",
                        ..
                    }
                ),
                "{rate}: {err:?}"
            );
        }
    }

    #[test]
    fn api_keys_parse_and_skip_malformed() {
        let keys = parse_api_keys("ops:abc, broken ,:nokey,ci:def");
        assert_eq!(
            keys,
            vec![
                ("ops".to_string(), "abc".to_string()),
                ("ci".to_string(), "def".to_string())
            ]
        );
    }
}
