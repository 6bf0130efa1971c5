use reel_core::errors::GenerationError;
use reel_settings::ContentRestrictionSettings;

/// Turns a failed attempt into the text handed to `on_error`.
///
/// Transport failures whose detail contains one of the configured
/// signatures are rewritten to the content-restriction message. Everything
/// else uses [`GenerationError::user_message`].
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    signatures: Vec<String>,
    message: String,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_settings(&ContentRestrictionSettings::default())
    }
}

impl ErrorClassifier {
    pub fn new(signatures: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            signatures: signatures
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            message: message.into(),
        }
    }

    pub fn from_settings(settings: &ContentRestrictionSettings) -> Self {
        Self::new(settings.signatures.clone(), settings.message.clone())
    }

    /// Whether `detail` looks like a content-policy kill.
    pub fn is_restricted(&self, detail: &str) -> bool {
        let detail = detail.to_lowercase();
        self.signatures.iter().any(|s| detail.contains(s.as_str()))
    }

    pub fn classify(&self, error: &GenerationError) -> String {
        let detail = match error {
            GenerationError::Transport(detail) | GenerationError::StreamInterrupted(detail) => {
                Some(detail.as_str())
            }
            _ => None,
        };
        match detail {
            Some(d) if self.is_restricted(d) => self.message.clone(),
            _ => error.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn chunked_encoding_is_rewritten() {
        let classifier = ErrorClassifier::default();
        let err = GenerationError::StreamInterrupted(
            "net::ERR_INCOMPLETE_CHUNKED_ENCODING 200".into(),
        );
        assert!(classifier.classify(&err).contains("content restrictions"));
    }

    #[test]
    fn unmatched_interruption_keeps_connection_message() {
        let classifier = ErrorClassifier::default();
        let err = GenerationError::StreamInterrupted("connection reset by peer".into());
        assert!(classifier.classify(&err).starts_with("Connection interrupted"));
    }

    #[test]
    fn http_body_is_never_rewritten() {
        let classifier = ErrorClassifier::new(vec!["quota".into()], "policy");
        let err = GenerationError::Http {
            status: 429,
            body: "quota exceeded".into(),
        };
        assert_eq!(classifier.classify(&err), "quota exceeded");
    }

    #[test]
    fn idle_timeout_not_rewritten() {
        let classifier = ErrorClassifier::default();
        let err = GenerationError::IdleTimeout(Duration::from_secs(300));
        assert!(classifier.classify(&err).starts_with("Connection interrupted"));
    }

    #[test]
    fn custom_signatures_case_insensitive() {
        let classifier = ErrorClassifier::new(vec!["Blocked".into(), String::new()], "nope");
        assert_eq!(
            classifier.classify(&GenerationError::Transport("request BLOCKED upstream".into())),
            "nope"
        );
        assert!(!classifier.is_restricted("fine"));
    }
}
