//! Identity Verifier (C1): validates a bearer credential and returns a
//! [`Principal`]. Two modes, chosen once at startup from [`Settings`]:
//! trust-anchored (delegates to an external identity service over HTTP) and
//! developer bypass (local testing only).

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::AuthError;
use crate::protocol::UserId;

const TRUST_ANCHOR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: UserId,
    pub display_name: Arc<str>,
    pub photo_url: Option<Arc<str>>,
}

enum Mode {
    TrustAnchored { anchor_url: String },
    DeveloperBypass,
    /// Neither a trust anchor nor the non-production bypass is configured.
    /// Every `verify` call fails closed rather than silently accepting any
    /// bearer token.
    Unconfigured,
}

pub struct IdentityVerifier {
    mode: Mode,
}

#[derive(Deserialize)]
struct AnchorResponse {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "photoUrl")]
    photo_url: Option<String>,
}

/// Claims lifted from the unverified middle segment of a bypass token that
/// happens to have the three-segment structure of a signed web token.
#[derive(Deserialize, Default)]
struct BypassClaims {
    #[serde(rename = "userId", alias = "sub")]
    user_id: Option<String>,
    #[serde(rename = "displayName", alias = "name")]
    display_name: Option<String>,
    #[serde(rename = "photoUrl", alias = "picture")]
    photo_url: Option<String>,
}

impl IdentityVerifier {
    pub fn new(settings: &Settings) -> Self {
        let mode = match &settings.identity_trust_anchor_url {
            Some(anchor_url) => Mode::TrustAnchored {
                anchor_url: anchor_url.clone(),
            },
            None if settings.skip_auth() => Mode::DeveloperBypass,
            None => {
                log::warn!(
                    "no identity trust anchor configured and non-production bypass is not \
                     enabled; every AUTH attempt will be rejected until one is set"
                );
                Mode::Unconfigured
            }
        };
        Self { mode }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self.mode, Mode::DeveloperBypass)
    }

    pub fn mode_label(&self) -> &'static str {
        match self.mode {
            Mode::TrustAnchored { .. } => "trust-anchored",
            Mode::DeveloperBypass => "developer-bypass",
            Mode::Unconfigured => "unconfigured",
        }
    }

    pub async fn verify(
        &self,
        token: &str,
        client_display_name: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let mut principal = match &self.mode {
            Mode::TrustAnchored { anchor_url } => verify_trust_anchored(anchor_url, token).await?,
            Mode::DeveloperBypass => verify_bypass(token),
            Mode::Unconfigured => return Err(AuthError::Unconfigured),
        };
        if let Some(name) = client_display_name {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                principal.display_name = Arc::from(trimmed);
            }
        }
        Ok(principal)
    }
}

async fn verify_trust_anchored(anchor_url: &str, token: &str) -> Result<Principal, AuthError> {
    let client = awc::Client::builder()
        .timeout(TRUST_ANCHOR_TIMEOUT)
        .finish();
    let mut response = client
        .get(anchor_url)
        .insert_header(("Authorization", format!("Bearer {token}")))
        .send()
        .await
        .map_err(|err| {
            if err.to_string().to_lowercase().contains("timeout") {
                AuthError::Timeout
            } else {
                AuthError::AnchorUnreachable(err.to_string())
            }
        })?;

    if !response.status().is_success() {
        return Err(AuthError::Invalid(format!(
            "trust anchor returned {}",
            response.status()
        )));
    }

    let body: AnchorResponse = response
        .json()
        .await
        .map_err(|err| AuthError::Invalid(err.to_string()))?;

    Ok(Principal {
        user_id: Arc::from(body.user_id),
        display_name: Arc::from(body.display_name),
        photo_url: body.photo_url.map(Arc::from),
    })
}

fn verify_bypass(token: &str) -> Principal {
    let claims = decode_unverified_claims(token).unwrap_or_default();
    let user_id = claims
        .user_id
        .map(Arc::from)
        .unwrap_or_else(synthesize_user_id);
    let display_name = claims
        .display_name
        .map(Arc::from)
        .unwrap_or_else(|| Arc::from(user_id.as_ref()));
    Principal {
        user_id,
        display_name,
        photo_url: claims.photo_url.map(Arc::from),
    }
}

/// Decodes the middle segment of a three-segment token (the structure of a
/// signed web token) without verifying its signature. Returns `None` if the
/// token doesn't have that structure or the segment isn't valid JSON.
fn decode_unverified_claims(token: &str) -> Option<BypassClaims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn synthesize_user_id() -> UserId {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut id = String::with_capacity(16);
    id.push_str("anon-");
    let mut rng = fastrand::Rng::new();
    for _ in 0..12 {
        let idx = rng.usize(0..CHARSET.len());
        id.push(CHARSET[idx] as char);
    }
    Arc::from(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(input: &str) -> String {
        URL_SAFE_NO_PAD.encode(input)
    }

    #[test]
    fn bypass_decodes_three_segment_token() {
        let payload = b64(r#"{"userId":"u1","displayName":"Alice","photoUrl":"https://x/p.png"}"#);
        let token = format!("header.{payload}.sig");
        let principal = verify_bypass(&token);
        assert_eq!(principal.user_id.as_ref(), "u1");
        assert_eq!(principal.display_name.as_ref(), "Alice");
        assert_eq!(principal.photo_url.as_deref(), Some("https://x/p.png"));
    }

    #[test]
    fn bypass_synthesizes_id_for_opaque_token() {
        let principal = verify_bypass("not-a-jwt");
        assert!(principal.user_id.starts_with("anon-"));
    }

    #[test]
    fn client_display_name_overrides_token_claim() {
        let payload = b64(r#"{"userId":"u1","displayName":"Alice"}"#);
        let token = format!("header.{payload}.sig");
        let mut principal = verify_bypass(&token);
        let override_name = "  Bob  ";
        let trimmed = override_name.trim();
        if !trimmed.is_empty() {
            principal.display_name = Arc::from(trimmed);
        }
        assert_eq!(principal.display_name.as_ref(), "Bob");
    }

    #[test]
    fn blank_client_display_name_does_not_override() {
        let payload = b64(r#"{"userId":"u1","displayName":"Alice"}"#);
        let token = format!("header.{payload}.sig");
        let principal = verify_bypass(&token);
        assert_eq!(principal.display_name.as_ref(), "Alice");
    }

    fn settings(non_production: bool, anchor_url: Option<&str>) -> Settings {
        Settings {
            port: 8080,
            heartbeat_interval_ms: 15_000,
            auth_timeout_ms: 30_000,
            max_connections_per_room: 50,
            max_total_connections: 500,
            message_rate_limit: 100,
            identity_trust_anchor_url: anchor_url.map(str::to_string),
            cors_allowed_origins: "*".to_string(),
            non_production,
            floor_ttl_secs: 120,
        }
    }

    #[test]
    fn anchor_configured_selects_trust_anchored_regardless_of_non_production() {
        let verifier = IdentityVerifier::new(&settings(false, Some("https://idp.example.com")));
        assert_eq!(verifier.mode_label(), "trust-anchored");
        let verifier = IdentityVerifier::new(&settings(true, Some("https://idp.example.com")));
        assert_eq!(verifier.mode_label(), "trust-anchored");
    }

    #[test]
    fn non_production_with_no_anchor_selects_developer_bypass() {
        let verifier = IdentityVerifier::new(&settings(true, None));
        assert_eq!(verifier.mode_label(), "developer-bypass");
        assert!(verifier.is_bypass());
    }

    #[test]
    fn production_with_no_anchor_fails_closed_instead_of_bypassing() {
        let verifier = IdentityVerifier::new(&settings(false, None));
        assert_eq!(verifier.mode_label(), "unconfigured");
        assert!(!verifier.is_bypass());
    }

    #[actix_rt::test]
    async fn unconfigured_verifier_rejects_every_token() {
        let verifier = IdentityVerifier::new(&settings(false, None));
        let err = verifier.verify("anything", None).await.unwrap_err();
        assert!(matches!(err, AuthError::Unconfigured));
    }
}
