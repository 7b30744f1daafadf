use crate::config::Lookup;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Notification-Signature";

/// Settings for the account-deletion webhook.
#[derive(Clone, Default)]
pub struct NotificationConfig {
    /// Token registered with the platform for the endpoint-validation challenge.
    pub verification_token: Option<String>,
    /// Public URL of the endpoint exactly as registered with the platform.
    pub endpoint_url: Option<String>,
    /// Shared secret for body signatures; unset means unsigned payloads are accepted.
    pub signing_secret: Option<String>,
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("challenge_enabled", &self.verification_token.is_some())
            .field("signing_enabled", &self.signing_secret.is_some())
            .finish()
    }
}

impl NotificationConfig {
    pub fn from_lookup(env: &Lookup<'_>) -> Self {
        Self {
            verification_token: env.get("EBAY_VERIFICATION_TOKEN"),
            endpoint_url: env.get("EBAY_NOTIFICATION_ENDPOINT"),
            signing_secret: env.get("NOTIFICATION_SIGNING_SECRET"),
        }
    }

    /// Answer to the platform's validation challenge, if configured.
    pub fn challenge_response(&self, challenge_code: &str) -> Option<String> {
        let token = self.verification_token.as_deref()?;
        let endpoint = self.endpoint_url.as_deref()?;
        Some(challenge_hash(challenge_code, token, endpoint))
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Verification {
        let Some(secret) = self.signing_secret.as_deref() else {
            return Verification::Unsigned;
        };
        let Some(presented) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return Verification::Rejected("missing signature");
        };
        let Ok(expected) = hex::decode(presented) else {
            return Verification::Rejected("signature is not hex");
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return Verification::Rejected("unusable signing secret");
        };
        mac.update(body);
        match mac.verify_slice(&expected) {
            Ok(()) => Verification::Verified,
            Err(_) => Verification::Rejected("signature mismatch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No secret configured; the payload is taken as-is.
    Unsigned,
    Verified,
    Rejected(&'static str),
}

/// `hex(sha256(challenge_code + verification_token + endpoint))`
pub fn challenge_hash(challenge_code: &str, verification_token: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_code.as_bytes());
    hasher.update(verification_token.as_bytes());
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

/// Records an accepted deletion notification. No schema is enforced.
pub fn record_deletion(payload: &Value, verification: Verification) {
    let topic = payload
        .pointer("/metadata/topic")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let notification_id = payload
        .pointer("/notification/notificationId")
        .and_then(Value::as_str)
        .unwrap_or("-");
    info!(
        target = "watch_scout.notifications",
        topic,
        notification_id,
        verification = ?verification,
        payload = %payload,
        "received deletion notification"
    );
}

pub fn record_rejection(reason: &'static str) {
    warn!(
        target = "watch_scout.notifications",
        reason, "rejected deletion notification"
    );
}

#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
