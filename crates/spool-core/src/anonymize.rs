use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of an anonymization pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anonymized {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replacements: Vec<Replacement>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Replacement {
    pub placeholder: String,
    pub entity_kind: String,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum AnonymizeError {
    #[error("unsupported locale: {0}")]
    UnsupportedLocale(String),
    #[error("anonymization failed: {0}")]
    Failed(String),
}

/// PII-redaction port. A failure here must surface as a run-level error:
/// unredacted text never falls through to the model.
#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(&self, text: &str, locale: &str) -> Result<Anonymized, AnonymizeError>;
}

/// Pass-through anonymizer for runs that never need redaction.
pub struct NoopAnonymizer;

#[async_trait]
impl Anonymizer for NoopAnonymizer {
    async fn anonymize(&self, text: &str, _locale: &str) -> Result<Anonymized, AnonymizeError> {
        Ok(Anonymized {
            text: text.to_string(),
            replacements: Vec::new(),
        })
    }
}
