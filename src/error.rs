//! Error types for Beacon voice

use std::fmt;

use thiserror::Error;

/// Result type alias for Beacon voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Beacon voice
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture or playback hardware unavailable, or the capture stream stalled
    #[error("device error: {0}")]
    Device(String),

    /// Speech-to-text collaborator failed
    #[error("transcription error: {0}")]
    Transcription(ServiceFailure),

    /// Reasoning backend failed
    #[error("backend error: {0}")]
    Backend(ServiceFailure),

    /// Text-to-speech collaborator failed
    #[error("synthesis error: {0}")]
    Synthesis(ServiceFailure),

    /// Playback failed or was truncated
    #[error("playback error: {0}")]
    Playback(String),

    /// User- or system-initiated abort
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// Why an external collaborator call failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFailure {
    /// Connection refused, DNS failure, dropped connection
    Network(String),
    /// Credentials missing or rejected
    Auth(String),
    /// No response within the configured call timeout
    Timeout,
    /// Provider answered but produced nothing usable
    EmptyResult,
    /// Non-success HTTP status
    Status {
        /// HTTP status code
        code: u16,
        /// Response body, possibly truncated
        body: String,
    },
    /// Response could not be decoded
    Decode(String),
    /// Local engine failed to run or exited unsuccessfully
    Process(String),
}

impl ServiceFailure {
    /// Classify a non-success HTTP status
    #[must_use]
    pub fn from_status(code: u16, body: String) -> Self {
        match code {
            401 | 403 => Self::Auth(format!("status {code}")),
            408 | 504 => Self::Timeout,
            _ => Self::Status { code, body },
        }
    }

    /// Classify a transport-level reqwest failure
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), String::new())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Timeout => f.write_str("timed out"),
            Self::EmptyResult => f.write_str("empty result"),
            Self::Status { code, body } => write!(f, "status {code}: {body}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
        }
    }
}

/// Failure class used for the user-visible status signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Device,
    Transcription,
    Backend,
    Synthesis,
    Playback,
    Cancelled,
    Other,
}

impl FailureClass {
    /// Short status line shown (and optionally spoken) for this class
    #[must_use]
    pub const fn notice(self) -> &'static str {
        match self {
            Self::Device => "Audio device problem. Listening again.",
            Self::Transcription => "Sorry, I didn't catch that.",
            Self::Backend => "Sorry, I couldn't get a response. Try again.",
            Self::Synthesis => "Sorry, I couldn't say the reply.",
            Self::Playback => "Playback failed.",
            Self::Cancelled => "Cancelled.",
            Self::Other => "Something went wrong.",
        }
    }

    /// Whether this class counts as a fault (cancellation does not)
    #[must_use]
    pub const fn is_fault(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Device => "device",
            Self::Transcription => "transcription",
            Self::Backend => "backend",
            Self::Synthesis => "synthesis",
            Self::Playback => "playback",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Map this error onto its failure class
    #[must_use]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::Device(_) => FailureClass::Device,
            Self::Transcription(_) => FailureClass::Transcription,
            Self::Backend(_) => FailureClass::Backend,
            Self::Synthesis(_) => FailureClass::Synthesis,
            Self::Playback(_) => FailureClass::Playback,
            Self::Cancelled => FailureClass::Cancelled,
            _ => FailureClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ServiceFailure::from_status(401, String::new()),
            ServiceFailure::Auth(_)
        ));
        assert_eq!(
            ServiceFailure::from_status(504, String::new()),
            ServiceFailure::Timeout
        );
        assert_eq!(
            ServiceFailure::from_status(500, "boom".to_string()),
            ServiceFailure::Status {
                code: 500,
                body: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_failure_classes_are_distinct() {
        let errors = [
            Error::Device("gone".to_string()),
            Error::Transcription(ServiceFailure::EmptyResult),
            Error::Backend(ServiceFailure::Timeout),
            Error::Synthesis(ServiceFailure::Network("refused".to_string())),
            Error::Cancelled,
        ];
        let notices: std::collections::HashSet<_> = errors
            .iter()
            .map(|e| e.failure_class().notice())
            .collect();
        assert_eq!(notices.len(), errors.len());
        assert!(!Error::Cancelled.failure_class().is_fault());
    }
}
