//! Per-provider request shapes and authentication rules
//!
//! The three supported hosts differ only in how they identify themselves,
//! how they name events, and how they sign deliveries. [`Provider`] carries
//! those differences so the rest of the pipeline runs one code path.

use axum::body::Bytes;
use axum::http::HeaderMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::{HookConfig, ProviderConfig};
use crate::error::HookError;
use crate::signature::{verify_hmac_sha1, verify_hmac_sha256, verify_token};

pub const GITHUB_AGENT: &str = "GitHub-Hookshot";
pub const GITEE_AGENT: &str = "git-oschina-hook";
pub const CODING_AGENT: &str = "Coding.net Hook";

const USER_AGENT: &str = "User-Agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Github,
    Gitee,
    Coding,
}

/// How a provider proves a delivery is genuine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha1,
    HmacSha256,
    TokenEquality,
    None,
}

/// Credential material pulled out of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// `sha1=<hex>` digest over the raw body
    HmacSha1(String),
    /// `sha256=<hex>` digest over the raw body
    HmacSha256(String),
    /// Shared token sent verbatim
    Token(String),
}

impl Credential {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Credential::HmacSha1(_) => SignatureScheme::HmacSha1,
            Credential::HmacSha256(_) => SignatureScheme::HmacSha256,
            Credential::Token(_) => SignatureScheme::TokenEquality,
        }
    }
}

/// One inbound delivery, already split into the parts the core cares about.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub provider: Provider,
    pub agent: String,
    pub event: String,
    pub repo: String,
    pub credential: Option<Credential>,
    pub body: Bytes,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Gitee => "gitee",
            Provider::Coding => "coding",
        }
    }

    pub fn default_agent(&self) -> &'static str {
        match self {
            Provider::Github => GITHUB_AGENT,
            Provider::Gitee => GITEE_AGENT,
            Provider::Coding => CODING_AGENT,
        }
    }

    pub fn event_header(&self) -> &'static str {
        match self {
            Provider::Github => "X-GitHub-Event",
            Provider::Gitee => "X-Gitee-Event",
            Provider::Coding => "X-Coding-Event",
        }
    }

    /// GitHub relays append a build id (`GitHub-Hookshot/abc123`), so only a
    /// substring is required there; the others must match exactly.
    pub fn agent_matches(&self, expected: &str, agent: &str) -> bool {
        match self {
            Provider::Github => {
                !expected.is_empty()
                    && agent
                        .to_ascii_lowercase()
                        .contains(&expected.to_ascii_lowercase())
            }
            Provider::Gitee | Provider::Coding => agent == expected,
        }
    }

    /// Gitee sends descriptions like `Push Hook` or `Merge Request Hook`;
    /// only the first word, lower-cased, names the script.
    pub fn normalize_event(&self, event: &str) -> String {
        match self {
            Provider::Gitee => event
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_lowercase(),
            Provider::Github | Provider::Coding => event.to_string(),
        }
    }

    /// Compare the caller's agent with the configured marker.
    pub fn verify_agent(&self, config: &ProviderConfig, agent: &str) -> Result<(), HookError> {
        if self.agent_matches(config.expected_agent(*self), agent) {
            return Ok(());
        }
        warn!(
            provider = self.name(),
            agent = %agent,
            "Request agent does not match provider"
        );
        Err(HookError::IdentityMismatch {
            provider: self.name().to_string(),
            agent: agent.to_string(),
        })
    }

    /// Build a [`WebhookRequest`] from the raw HTTP parts.
    pub fn parse_request(
        &self,
        repo: String,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<WebhookRequest, HookError> {
        let agent = user_agent(headers).to_string();
        let raw_event = header_str(headers, self.event_header())
            .ok_or_else(|| HookError::MissingHeader(self.event_header().to_string()))?;
        let event = self.normalize_event(raw_event);
        if event.is_empty() {
            return Err(HookError::MissingHeader(self.event_header().to_string()));
        }

        let credential = match self {
            Provider::Github => header_str(headers, "X-Hub-Signature-256")
                .map(|s| Credential::HmacSha256(s.to_string()))
                .or_else(|| {
                    header_str(headers, "X-Hub-Signature")
                        .map(|s| Credential::HmacSha1(s.to_string()))
                }),
            Provider::Gitee => {
                header_str(headers, "X-Gitee-Token").map(|s| Credential::Token(s.to_string()))
            }
            Provider::Coding => match header_str(headers, "X-Coding-Signature") {
                Some(signature) => Some(Credential::HmacSha1(signature.to_string())),
                None => coding_body_token(&body)?.map(Credential::Token),
            },
        };

        debug!(
            provider = self.name(),
            repo = %repo,
            event = %event,
            signed = credential.is_some(),
            "Parsed webhook delivery"
        );

        Ok(WebhookRequest {
            provider: *self,
            agent,
            event,
            repo,
            credential,
            body,
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl WebhookRequest {
    pub fn scheme(&self) -> SignatureScheme {
        self.credential
            .as_ref()
            .map_or(SignatureScheme::None, Credential::scheme)
    }

    /// Run the identity check, then the signature check.
    ///
    /// The identity check always comes first so a valid signature can never
    /// stand in for a wrong agent. A missing credential passes unless
    /// `security.require_signature` is set.
    pub fn authenticate(&self, config: &HookConfig) -> Result<(), HookError> {
        let provider_config = config.provider(self.provider);
        self.check_identity(provider_config)?;
        self.check_signature(provider_config, config.security.require_signature)
    }

    fn check_identity(&self, provider_config: &ProviderConfig) -> Result<(), HookError> {
        self.provider.verify_agent(provider_config, &self.agent)
    }

    fn check_signature(
        &self,
        provider_config: &ProviderConfig,
        require_signature: bool,
    ) -> Result<(), HookError> {
        let Some(credential) = &self.credential else {
            if require_signature {
                warn!(
                    provider = self.provider.name(),
                    repo = %self.repo,
                    "Unsigned delivery rejected"
                );
                return Err(HookError::MissingSignature(self.provider.name().to_string()));
            }
            debug!(
                provider = self.provider.name(),
                repo = %self.repo,
                "No signature supplied, skipping verification"
            );
            return Ok(());
        };

        if !provider_config.has_secret() {
            warn!(
                provider = self.provider.name(),
                "Delivery is signed but no secret is configured"
            );
            return Err(HookError::SignatureMismatch(self.provider.name().to_string()));
        }

        let secret = provider_config.token.as_str();
        let valid = match credential {
            Credential::HmacSha1(signature) => verify_hmac_sha1(secret, &self.body, signature),
            Credential::HmacSha256(signature) => {
                verify_hmac_sha256(secret, &self.body, signature)
            }
            Credential::Token(token) => verify_token(secret, token),
        };

        if valid {
            Ok(())
        } else {
            warn!(
                provider = self.provider.name(),
                repo = %self.repo,
                scheme = ?credential.scheme(),
                "Signature doesn't match"
            );
            Err(HookError::SignatureMismatch(self.provider.name().to_string()))
        }
    }
}

/// The `User-Agent` header, or an empty string when absent or not text.
pub fn user_agent(headers: &HeaderMap) -> &str {
    header_str(headers, USER_AGENT).unwrap_or_default()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Coding puts the token in the JSON body when no signature header is sent.
fn coding_body_token(body: &Bytes) -> Result<Option<String>, HookError> {
    if body.is_empty() {
        return Ok(None);
    }
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| HookError::InvalidPayload(format!("Coding body is not JSON: {}", e)))?;
    let object = payload
        .as_object()
        .ok_or_else(|| HookError::InvalidPayload("Coding body is not a JSON object".into()))?;
    Ok(object
        .get("token")
        .and_then(|t| t.as_str())
        .map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::signature::{compute_hmac_sha1_hex, compute_hmac_sha256_hex};
    use axum::http::{HeaderName, HeaderValue};

    const BODY: &str = r#"{"ref":"refs/heads/main"}"#;

    fn config() -> HookConfig {
        let mut config = HookConfig::new("/srv/hooks");
        config.github = ProviderConfig::new("gh-secret");
        config.gitee = ProviderConfig::new("gitee-secret");
        config.coding = ProviderConfig::new("coding-secret");
        config
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    fn github_signature(secret: &str, body: &str) -> String {
        format!("sha1={}", compute_hmac_sha1_hex(secret, body.as_bytes()).unwrap())
    }

    #[test]
    fn gitee_event_takes_first_word_lower_cased() {
        assert_eq!(Provider::Gitee.normalize_event("Push Hook"), "push");
        assert_eq!(Provider::Gitee.normalize_event("Merge Request Hook"), "merge");
        assert_eq!(Provider::Gitee.normalize_event("Tag"), "tag");
        assert_eq!(Provider::Gitee.normalize_event("   "), "");
    }

    #[test]
    fn github_and_coding_events_pass_through() {
        assert_eq!(Provider::Github.normalize_event("pull_request"), "pull_request");
        assert_eq!(Provider::Coding.normalize_event("Push"), "Push");
    }

    #[test]
    fn github_agent_is_a_substring_match() {
        assert!(Provider::Github.agent_matches(GITHUB_AGENT, "GitHub-Hookshot/4e1f2a"));
        assert!(Provider::Github.agent_matches(GITHUB_AGENT, "github-hookshot/1"));
        assert!(!Provider::Github.agent_matches(GITHUB_AGENT, "curl/8.4.0"));
        assert!(!Provider::Github.agent_matches("", "anything"));
    }

    #[test]
    fn gitee_and_coding_agents_must_match_exactly() {
        assert!(Provider::Gitee.agent_matches(GITEE_AGENT, "git-oschina-hook"));
        assert!(!Provider::Gitee.agent_matches(GITEE_AGENT, "git-oschina-hook/2"));
        assert!(Provider::Coding.agent_matches(CODING_AGENT, "Coding.net Hook"));
        assert!(!Provider::Coding.agent_matches(CODING_AGENT, "coding.net hook"));
    }

    #[test]
    fn github_valid_signature_authenticates() {
        let h = headers(&[
            ("User-Agent", "GitHub-Hookshot/abc"),
            ("X-GitHub-Event", "push"),
            ("X-Hub-Signature", github_signature("gh-secret", BODY).as_str()),
        ]);
        let request = Provider::Github
            .parse_request("demo".into(), &h, Bytes::from(BODY))
            .unwrap();
        assert_eq!(request.event, "push");
        assert!(matches!(request.credential, Some(Credential::HmacSha1(_))));
        request.authenticate(&config()).unwrap();
    }

    #[test]
    fn github_prefers_sha256_header() {
        let sha256 = format!(
            "sha256={}",
            compute_hmac_sha256_hex("gh-secret", BODY.as_bytes()).unwrap()
        );
        let h = headers(&[
            ("User-Agent", "GitHub-Hookshot/abc"),
            ("X-GitHub-Event", "push"),
            ("X-Hub-Signature", "sha1=0000"),
            ("X-Hub-Signature-256", sha256.as_str()),
        ]);
        let request = Provider::Github
            .parse_request("demo".into(), &h, Bytes::from(BODY))
            .unwrap();
        assert_eq!(request.credential.as_ref().unwrap().scheme(), SignatureScheme::HmacSha256);
        request.authenticate(&config()).unwrap();
    }

    #[test]
    fn github_wrong_secret_is_rejected() {
        let h = headers(&[
            ("User-Agent", "GitHub-Hookshot/abc"),
            ("X-GitHub-Event", "push"),
            ("X-Hub-Signature", github_signature("wrong", BODY).as_str()),
        ]);
        let request = Provider::Github
            .parse_request("demo".into(), &h, Bytes::from(BODY))
            .unwrap();
        assert!(matches!(
            request.authenticate(&config()),
            Err(HookError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn agent_mismatch_wins_over_valid_signature() {
        let h = headers(&[
            ("User-Agent", "curl/8.4.0"),
            ("X-GitHub-Event", "push"),
            ("X-Hub-Signature", github_signature("gh-secret", BODY).as_str()),
        ]);
        let request = Provider::Github
            .parse_request("demo".into(), &h, Bytes::from(BODY))
            .unwrap();
        assert!(matches!(
            request.authenticate(&config()),
            Err(HookError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn missing_agent_is_an_identity_mismatch() {
        let h = headers(&[("X-Gitee-Event", "Push Hook")]);
        let request = Provider::Gitee
            .parse_request("demo".into(), &h, Bytes::new())
            .unwrap();
        assert!(matches!(
            request.authenticate(&config()),
            Err(HookError::IdentityMismatch { .. })
        ));
    }

    // Unsigned deliveries are accepted by default. Changing this must be a
    // deliberate edit to this test.
    #[test]
    fn unsigned_delivery_is_accepted_by_default() {
        for (provider, agent, event_header) in [
            (Provider::Github, "GitHub-Hookshot/1", "X-GitHub-Event"),
            (Provider::Gitee, GITEE_AGENT, "X-Gitee-Event"),
            (Provider::Coding, CODING_AGENT, "X-Coding-Event"),
        ] {
            let h = headers(&[("User-Agent", agent), (event_header, "push")]);
            let request = provider
                .parse_request("demo".into(), &h, Bytes::from("{}"))
                .unwrap();
            assert_eq!(request.scheme(), SignatureScheme::None);
            request.authenticate(&config()).unwrap();
        }
    }

    #[test]
    fn unsigned_delivery_is_rejected_when_signature_required() {
        let mut config = config();
        config.security.require_signature = true;
        let h = headers(&[("User-Agent", GITEE_AGENT), ("X-Gitee-Event", "Push Hook")]);
        let request = Provider::Gitee
            .parse_request("demo".into(), &h, Bytes::new())
            .unwrap();
        assert!(matches!(
            request.authenticate(&config),
            Err(HookError::MissingSignature(_))
        ));
    }

    #[test]
    fn gitee_token_is_compared_directly() {
        let good = headers(&[
            ("User-Agent", GITEE_AGENT),
            ("X-Gitee-Event", "Push Hook"),
            ("X-Gitee-Token", "gitee-secret"),
        ]);
        let request = Provider::Gitee
            .parse_request("demo".into(), &good, Bytes::new())
            .unwrap();
        assert_eq!(request.event, "push");
        request.authenticate(&config()).unwrap();

        let bad = headers(&[
            ("User-Agent", GITEE_AGENT),
            ("X-Gitee-Event", "Push Hook"),
            ("X-Gitee-Token", "guess"),
        ]);
        let request = Provider::Gitee
            .parse_request("demo".into(), &bad, Bytes::new())
            .unwrap();
        assert!(request.authenticate(&config()).is_err());
    }

    #[test]
    fn coding_accepts_body_token() {
        let h = headers(&[("User-Agent", CODING_AGENT), ("X-Coding-Event", "push")]);
        let body = Bytes::from(r#"{"token":"coding-secret","ref":"refs/heads/main"}"#);
        let request = Provider::Coding
            .parse_request("demo".into(), &h, body)
            .unwrap();
        assert_eq!(
            request.credential,
            Some(Credential::Token("coding-secret".to_string()))
        );
        request.authenticate(&config()).unwrap();

        let body = Bytes::from(r#"{"token":"nope"}"#);
        let request = Provider::Coding
            .parse_request("demo".into(), &h, body)
            .unwrap();
        assert!(request.authenticate(&config()).is_err());
    }

    #[test]
    fn coding_signature_header_takes_precedence_over_body_token() {
        let body = r#"{"token":"wrong-token"}"#;
        let h = headers(&[
            ("User-Agent", CODING_AGENT),
            ("X-Coding-Event", "push"),
            ("X-Coding-Signature", github_signature("coding-secret", body).as_str()),
        ]);
        let request = Provider::Coding
            .parse_request("demo".into(), &h, Bytes::from(body))
            .unwrap();
        assert!(matches!(request.credential, Some(Credential::HmacSha1(_))));
        request.authenticate(&config()).unwrap();
    }

    #[test]
    fn coding_non_object_body_is_invalid() {
        let h = headers(&[("User-Agent", CODING_AGENT), ("X-Coding-Event", "push")]);
        for body in ["not json", "[1,2,3]"] {
            let result = Provider::Coding.parse_request("demo".into(), &h, Bytes::from(body));
            assert!(matches!(result, Err(HookError::InvalidPayload(_))));
        }
    }

    #[test]
    fn missing_event_header_is_rejected() {
        let h = headers(&[("User-Agent", "GitHub-Hookshot/1")]);
        let result = Provider::Github.parse_request("demo".into(), &h, Bytes::new());
        assert!(matches!(result, Err(HookError::MissingHeader(_))));
    }

    #[test]
    fn signed_delivery_without_configured_secret_is_rejected() {
        let config = HookConfig::new("/srv/hooks");
        let h = headers(&[
            ("User-Agent", GITEE_AGENT),
            ("X-Gitee-Event", "Push Hook"),
            ("X-Gitee-Token", ""),
        ]);
        let request = Provider::Gitee
            .parse_request("demo".into(), &h, Bytes::new())
            .unwrap();
        assert!(matches!(
            request.authenticate(&config),
            Err(HookError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn agent_check_does_not_need_a_parsable_request() {
        let config = config();
        let h = headers(&[("User-Agent", "curl/8.4.0")]);
        assert!(matches!(
            Provider::Coding.verify_agent(&config.coding, user_agent(&h)),
            Err(HookError::IdentityMismatch { .. })
        ));
        assert!(Provider::Coding.verify_agent(&config.coding, CODING_AGENT).is_ok());
        assert!(matches!(
            Provider::Gitee.verify_agent(&config.gitee, user_agent(&HeaderMap::new())),
            Err(HookError::IdentityMismatch { .. })
        ));
    }
}
