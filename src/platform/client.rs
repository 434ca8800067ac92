//! Wagering-platform REST client
//!
//! Session verification, settlement delivery and audit-trail export are
//! external, best-effort calls; their failure never rolls back in-memory
//! match state.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::player::BetData;
use crate::ws::protocol::{AuditTrail, MatchResult};

type HmacSha256 = Hmac<Sha256>;

/// Verified session identity plus the wager attached by the platform
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub player_id: Uuid,
    pub platform_user_id: String,
    pub display_name: String,
    pub bet: BetData,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
    player_id: Option<Uuid>,
    platform_user_id: Option<String>,
    display_name: Option<String>,
    stake: Option<f64>,
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
struct DisconnectNotice<'a> {
    player_id: Uuid,
    platform_user_id: &'a str,
    match_id: Uuid,
}

/// Platform client; holds the API key and the callback signing secret
#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
    api_key: String,
    callback_secret: String,
    dev_mode: bool,
}

impl PlatformClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.platform_base_url.clone(),
            api_key: config.platform_api_key.clone(),
            callback_secret: config.platform_callback_secret.clone(),
            dev_mode: config.game.dev_mode,
        }
    }

    /// Verify a session token. `Ok(None)` means the platform rejected it;
    /// transport errors surface as `Err` and callers treat them as a
    /// failed authentication.
    pub async fn verify_session(&self, token: &str) -> Result<Option<SessionInfo>, PlatformError> {
        // Dev servers accept `dev:<uuid>` tokens without a platform
        if self.dev_mode {
            if let Some(session) = parse_dev_token(token) {
                return Ok(Some(session));
            }
        }

        let url = format!("{}/v1/sessions/verify", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(PlatformError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api { status: status.as_u16(), body });
        }

        let verify: VerifyResponse = response.json().await.map_err(PlatformError::Parse)?;
        if !verify.valid {
            return Ok(None);
        }

        match (verify.player_id, verify.platform_user_id) {
            (Some(player_id), Some(platform_user_id)) => Ok(Some(SessionInfo {
                player_id,
                platform_user_id,
                display_name: verify
                    .display_name
                    .unwrap_or_else(|| format!("Player_{}", &player_id.to_string()[..8])),
                bet: BetData {
                    stake: verify.stake.unwrap_or(0.0),
                    currency: verify.currency.unwrap_or_else(|| "USD".to_string()),
                },
            })),
            _ => Ok(None),
        }
    }

    /// Deliver a settlement result, HMAC-signed so the platform can verify
    /// origin. Retries are the platform's concern, not ours.
    pub async fn send_match_result(&self, result: &MatchResult) -> Result<(), PlatformError> {
        let body = serde_json::to_string(result).map_err(PlatformError::Serialize)?;
        let signature = sign_payload(&self.callback_secret, body.as_bytes());

        let url = format!("{}/v1/matches/result", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Runner-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(PlatformError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api { status: status.as_u16(), body });
        }

        info!(match_id = %result.match_id, "Match result delivered");
        Ok(())
    }

    /// Export the verifiable post-match record to the audit sink
    pub async fn send_audit_trail(&self, trail: &AuditTrail) -> Result<(), PlatformError> {
        let body = serde_json::to_string(trail).map_err(PlatformError::Serialize)?;
        let signature = sign_payload(&self.callback_secret, body.as_bytes());

        let url = format!("{}/v1/matches/audit", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Runner-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(PlatformError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api { status: status.as_u16(), body });
        }

        Ok(())
    }

    /// Best-effort disconnect notice
    pub async fn notify_player_disconnect(
        &self,
        player_id: Uuid,
        platform_user_id: &str,
        match_id: Uuid,
    ) {
        let url = format!("{}/v1/players/disconnect", self.base_url);
        let notice = DisconnectNotice { player_id, platform_user_id, match_id };

        let result = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&notice)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(player_id = %player_id, status = %response.status(), "Disconnect notice rejected")
            }
            Err(e) => error!(player_id = %player_id, error = %e, "Disconnect notice failed"),
        }
    }
}

/// HMAC-SHA256 over the raw body, hex-encoded
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// `dev:<uuid>` tokens authenticate locally in dev mode with a flat stake
fn parse_dev_token(token: &str) -> Option<SessionInfo> {
    let raw = token.strip_prefix("dev:")?;
    let player_id: Uuid = raw.parse().ok()?;
    Some(SessionInfo {
        player_id,
        platform_user_id: format!("dev-{}", player_id),
        display_name: format!("Dev_{}", &player_id.to_string()[..8]),
        bet: BetData { stake: 10.0, currency: "USD".to_string() },
    })
}

/// Platform errors
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("Failed to serialize payload: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_token_parses_to_session() {
        let id = Uuid::new_v4();
        let session = parse_dev_token(&format!("dev:{}", id)).unwrap();
        assert_eq!(session.player_id, id);
        assert_eq!(session.bet.stake, 10.0);

        assert!(parse_dev_token("dev:not-a-uuid").is_none());
        assert!(parse_dev_token(&id.to_string()).is_none());
    }

    #[test]
    fn signature_is_deterministic_and_key_sensitive() {
        let a = sign_payload("secret", b"{\"x\":1}");
        let b = sign_payload("secret", b"{\"x\":1}");
        let c = sign_payload("other", b"{\"x\":1}");
        let d = sign_payload("secret", b"{\"x\":2}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }
}
