//! Recognises backend errors that mean "this query cannot run until an index exists".
//!
//! Such errors are recoverable: the dashboard drops to fallback data and shows a
//! remediation banner instead of an error. Everything else is surfaced as-is.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::BackendError;

#[allow(clippy::expect_used)]
static INDEX_REQUIRED_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:requires an? (?:composite )?index|index is currently building|missing (?:a )?composite index|no matching index found)",
    )
    .expect("index signature regex is valid")
});

#[allow(clippy::expect_used)]
static REMEDIATION_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>()\[\]]+"#).expect("url regex is valid"));

/// Characters that end a sentence rather than a URL.
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Coarse error category; see [`ErrorClass`] for the payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    IndexRequired,
    Other,
}

/// Outcome of classifying one backend error.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ErrorClass {
    /// Recoverable: the query needs an index provisioned out-of-band.
    /// `dedup_key` is the remediation link, or the trimmed message when the
    /// backend did not include one.
    IndexRequired { dedup_key: String },
    /// Anything else; surfaced to the page, never auto-recovered.
    Other,
}

impl ErrorClass {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexRequired { .. } => ErrorKind::IndexRequired,
            Self::Other => ErrorKind::Other,
        }
    }

    #[must_use]
    pub fn dedup_key(&self) -> Option<&str> {
        match self {
            Self::IndexRequired { dedup_key } => Some(dedup_key),
            Self::Other => None,
        }
    }
}

/// Pure, deterministic classifier. Never touches the ledger; recording is the
/// caller's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn classify(&self, error: &BackendError) -> ErrorClass {
        let class = self.classify_message(&error.message);
        tracing::debug!(
            target: "fieldsync::classify",
            code = %error.code,
            kind = ?class.kind(),
            "classified backend error"
        );
        class
    }

    #[must_use]
    pub fn classify_message(&self, message: &str) -> ErrorClass {
        if !INDEX_REQUIRED_SIGNATURE.is_match(message) {
            return ErrorClass::Other;
        }
        let dedup_key = remediation_url(message).unwrap_or_else(|| message.trim().to_string());
        ErrorClass::IndexRequired { dedup_key }
    }
}

/// First link in `message` that points at index management, else the first link.
fn remediation_url(message: &str) -> Option<String> {
    let urls: Vec<&str> = REMEDIATION_URL
        .find_iter(message)
        .map(|m| m.as_str().trim_end_matches(URL_TRAILING_PUNCTUATION))
        .filter(|url| !url.is_empty())
        .collect();
    urls.iter()
        .find(|url| url.contains("index"))
        .or_else(|| urls.first())
        .map(|url| (*url).to_string())
}
