//! Error classification: maps an opaque handler failure to {transient,
//! fatal} using the rule catalogue in the handler contract.
//!
//! Handlers may either raise a [`HandlerError`] that already carries a
//! classification (`Transient`/`Fatal`) or a raw [`HandlerError::Message`]
//! shape, which is run through [`classify`] to categorize a raw transport
//! error by substring pattern.

use castqueue_db::models::ErrorType;

/// An error as reported by a stage handler.
///
/// Handlers that already know their own classification should construct
/// `Transient`/`Fatal` directly; everything else goes through [`classify`].
#[derive(Debug, Clone)]
pub enum HandlerError {
    /// The handler explicitly classified this failure.
    Transient(String),
    /// The handler explicitly classified this failure.
    Fatal(String),
    /// An HTTP status code from an upstream call.
    Http(u16),
    /// An I/O error kind.
    Io(std::io::ErrorKind),
    /// A free-text message, matched against the catalogue's string rules.
    Message(String),
    /// The handler observed cancellation. Never classified -- the worker
    /// special-cases this before reaching the classifier.
    Cancelled,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) | Self::Fatal(msg) | Self::Message(msg) => f.write_str(msg),
            Self::Http(code) => write!(f, "HTTP {code}"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The outcome of classification: a category plus a normalized reason
/// string suitable for `last_error`/`failure_reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub reason: String,
}

/// Per-handler override: whether an unrecognized error should default to
/// transient (the safe default) or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyConfig {
    pub default_transient: bool,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            default_transient: true,
        }
    }
}

/// Classify a handler error against the rule catalogue.
///
/// Pass-through for `Transient`/`Fatal` constructed explicitly by the
/// handler. Everything else is matched against a small catalogue of HTTP
/// status codes, I/O error kinds, and substring rules over free-text
/// messages; an error that matches nothing falls back to
/// `config.default_transient`.
pub fn classify(err: &HandlerError, config: ClassifyConfig) -> Classification {
    match err {
        HandlerError::Transient(reason) => Classification {
            error_type: ErrorType::Transient,
            reason: reason.clone(),
        },
        HandlerError::Fatal(reason) => Classification {
            error_type: ErrorType::Fatal,
            reason: reason.clone(),
        },
        HandlerError::Cancelled => Classification {
            error_type: ErrorType::Fatal,
            reason: "cancelled".to_owned(),
        },
        HandlerError::Http(code) => classify_http(*code, config),
        HandlerError::Io(kind) => classify_io(*kind, config),
        HandlerError::Message(msg) => classify_message(msg, config),
    }
}

fn classify_http(code: u16, config: ClassifyConfig) -> Classification {
    let reason = format!("HTTP {code}");
    let error_type = match code {
        408 | 425 | 429 | 500 | 502 | 503 | 504 => ErrorType::Transient,
        400 | 401 | 403 | 404 | 410 | 415 | 422 => ErrorType::Fatal,
        _ => default_type(config),
    };
    Classification { error_type, reason }
}

fn classify_io(kind: std::io::ErrorKind, config: ClassifyConfig) -> Classification {
    use std::io::ErrorKind;
    let reason = format!("I/O error: {kind}");
    let error_type = match kind {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted => ErrorType::Transient,
        ErrorKind::PermissionDenied | ErrorKind::StorageFull | ErrorKind::NotFound => {
            ErrorType::Fatal
        }
        _ => default_type(config),
    };
    Classification { error_type, reason }
}

/// Substring rules from the catalogue, checked case-insensitively. Order
/// matters only in that the first match wins; the patterns are chosen to
/// not overlap.
const TRANSIENT_PATTERNS: &[&str] = &[
    "database is locked",
    "database is busy",
    "connection reset",
    "dns",
    "timeout",
    "timed out",
    "tls handshake",
    "rate limit",
    "429",
    "invalid-json response",
    "invalid json response",
];

const FATAL_PATTERNS: &[&str] = &[
    "disk full",
    "out of space",
    "out-of-space",
    "permission denied",
    "corrupt",
    "unsupported media",
    "entity not found",
    "invalid configuration",
    "missing credential",
];

fn classify_message(msg: &str, config: ClassifyConfig) -> Classification {
    let lower = msg.to_lowercase();
    let error_type = if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorType::Transient
    } else if FATAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorType::Fatal
    } else {
        default_type(config)
    };
    Classification {
        error_type,
        reason: msg.to_owned(),
    }
}

fn default_type(config: ClassifyConfig) -> ErrorType {
    if config.default_transient {
        ErrorType::Transient
    } else {
        ErrorType::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_transient_codes() {
        for code in [408, 425, 429, 500, 502, 503, 504] {
            let c = classify(&HandlerError::Http(code), ClassifyConfig::default());
            assert_eq!(c.error_type, ErrorType::Transient, "code {code}");
        }
    }

    #[test]
    fn http_fatal_codes() {
        for code in [400, 401, 403, 404, 410, 415, 422] {
            let c = classify(&HandlerError::Http(code), ClassifyConfig::default());
            assert_eq!(c.error_type, ErrorType::Fatal, "code {code}");
        }
    }

    #[test]
    fn http_unknown_code_defaults_transient() {
        let c = classify(&HandlerError::Http(599), ClassifyConfig::default());
        assert_eq!(c.error_type, ErrorType::Transient);
    }

    #[test]
    fn io_connection_reset_is_transient() {
        let c = classify(
            &HandlerError::Io(std::io::ErrorKind::ConnectionReset),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Transient);
    }

    #[test]
    fn message_rate_limit_is_transient() {
        let c = classify(
            &HandlerError::Message("LLM API rate limit exceeded".to_owned()),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Transient);
    }

    #[test]
    fn message_corrupt_media_is_fatal() {
        let c = classify(
            &HandlerError::Message("corrupt or unsupported media file".to_owned()),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Fatal);
    }

    #[test]
    fn message_entity_not_found_is_fatal() {
        let c = classify(
            &HandlerError::Message("entity not found: episode".to_owned()),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Fatal);
    }

    #[test]
    fn unclassified_defaults_to_transient() {
        let c = classify(
            &HandlerError::Message("something unexpected happened".to_owned()),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Transient);
    }

    #[test]
    fn unclassified_honors_default_transient_false_override() {
        let config = ClassifyConfig {
            default_transient: false,
        };
        let c = classify(&HandlerError::Message("mystery error".to_owned()), config);
        assert_eq!(c.error_type, ErrorType::Fatal);
    }

    #[test]
    fn explicit_classification_is_pass_through() {
        let c = classify(
            &HandlerError::Fatal("handler knows this is unrecoverable".to_owned()),
            ClassifyConfig::default(),
        );
        assert_eq!(c.error_type, ErrorType::Fatal);
    }
}
