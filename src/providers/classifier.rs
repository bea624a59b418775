//! Maps raw provider replies onto cascade decisions.
//!
//! The provider reports most failures only through free-form
//! `error.message` text, so the revoked-key and policy signals are
//! pattern lists taken from configuration rather than hard-coded checks.

use crate::config::DispatchConfig;
use crate::core::error::EspejoError;
use crate::providers::RouteResponse;
use crate::providers::gemini::types::GeminiResponse;
use regex::{RegexSet, RegexSetBuilder};

/// Classification of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    /// Key is unusable for the rest of the call.
    CredentialRevoked(String),
    /// Content-level rejection; ends the call.
    PolicyBlocked(String),
    /// HTTP 429; transient, but worth a pause.
    RateLimited(String),
    /// Network error, 5xx, unparseable or empty reply, anything unknown.
    Transient(String),
}

#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    revoked: RegexSet,
    policy: RegexSet,
}

impl ResponseClassifier {
    pub fn new(revoked_patterns: &[String], policy_patterns: &[String]) -> Result<Self, EspejoError> {
        Ok(Self {
            revoked: compile(revoked_patterns)?,
            policy: compile(policy_patterns)?,
        })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, EspejoError> {
        Self::new(&config.revoked_patterns, &config.policy_patterns)
    }

    pub fn classify(&self, response: &RouteResponse) -> AttemptOutcome {
        let success = (200..300).contains(&response.status);
        let parsed = match serde_json::from_str::<GeminiResponse>(&response.body) {
            Ok(parsed) => parsed,
            Err(_) if response.status == 429 => {
                return AttemptOutcome::RateLimited("HTTP 429".to_string());
            }
            Err(e) => {
                return AttemptOutcome::Transient(format!(
                    "unparseable response (HTTP {}): {}",
                    response.status, e
                ));
            }
        };

        if success {
            if let Some(text) = parsed.completion_text() {
                return AttemptOutcome::Success(text);
            }
            if let Some(reason) = parsed.block_reason() {
                return AttemptOutcome::PolicyBlocked(reason);
            }
            return AttemptOutcome::Transient("empty completion".to_string());
        }

        let message = parsed
            .error
            .as_ref()
            .map(|e| match &e.status {
                Some(status) => format!("{} ({})", e.message, status),
                None => e.message.clone(),
            })
            .unwrap_or_else(|| format!("HTTP {}", response.status));

        if self.revoked.is_match(&message) {
            AttemptOutcome::CredentialRevoked(message)
        } else if self.policy.is_match(&message) {
            AttemptOutcome::PolicyBlocked(message)
        } else if response.status == 429 {
            AttemptOutcome::RateLimited(message)
        } else {
            AttemptOutcome::Transient(message)
        }
    }
}

fn compile(patterns: &[String]) -> Result<RegexSet, EspejoError> {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .map_err(|e| EspejoError::Config(format!("Invalid classifier pattern: {}", e)))
}
