//! Error type shared across the digest pipeline.
//!
//! Every external collaborator failure is folded into one enum so the
//! fallback logic can branch on error class (transient vs. permanent vs.
//! model-missing) instead of inspecting message strings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned status {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("billing/credits problem: {0}")]
    Billing(String),

    #[error("model not available on endpoint: {0}")]
    ModelMissing(String),

    #[error("model pull failed: {0}")]
    ModelPull(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("script parse error: {0}")]
    ScriptParse(String),

    #[error("TTS synthesis failed: {0}")]
    Tts(String),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audio error: {0}")]
    Audio(#[from] hound::Error),

    #[error("no new articles after duplicate filtering")]
    NoNewArticles,
}

impl Error {
    /// Transient failures are worth retrying with backoff: rate limits,
    /// overload, server busy, and connection-level problems. Everything
    /// else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Api { status, .. } => matches!(status, 429 | 503 | 529),
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// "Model not found"-class errors from the local endpoint. Script
    /// generation reacts to these by re-running model selection.
    pub fn is_model_missing(&self) -> bool {
        matches!(self, Error::ModelMissing(_))
    }

    /// Short label used as the subject line of error notification emails.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Api { status: 429, .. } => "API Rate Limited",
            Error::Api { status: 529, .. } => "API Overloaded",
            Error::Api { .. } => "API Error",
            Error::Auth(_) => "API Authentication Failed",
            Error::Billing(_) => "API Credits Exhausted",
            Error::ModelMissing(_) | Error::ModelPull(_) => "Local Model Unavailable",
            Error::ScriptParse(_) => "Script Parsing Failed",
            Error::Tts(_) => "TTS Synthesis Failed",
            Error::Audio(_) => "Audio Assembly Failed",
            Error::Mail(_) | Error::Smtp(_) => "Email Sending Failed",
            Error::NoNewArticles => "No New Articles Found",
            _ => "Unexpected Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_classification() {
        let rate_limited = Error::Api {
            provider: "claude",
            status: 429,
            message: "rate limited".into(),
        };
        let overloaded = Error::Api {
            provider: "claude",
            status: 529,
            message: "overloaded".into(),
        };
        let bad_request = Error::Api {
            provider: "claude",
            status: 400,
            message: "bad request".into(),
        };
        assert!(rate_limited.is_transient());
        assert!(overloaded.is_transient());
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn permanent_errors_are_not_transient() {
        assert!(!Error::Auth("bad key".into()).is_transient());
        assert!(!Error::Billing("out of credits".into()).is_transient());
        assert!(!Error::ModelMissing("qwen3:14b".into()).is_transient());
    }

    #[test]
    fn model_missing_detection() {
        assert!(Error::ModelMissing("gone".into()).is_model_missing());
        assert!(!Error::Tts("boom".into()).is_model_missing());
    }
}
