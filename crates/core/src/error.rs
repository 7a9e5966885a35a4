//! Error taxonomy shared by the poll engine, the lifecycle driver and the
//! migration orchestrator.
//!
//! - `Minor`: transient, worth another attempt until the deadline.
//! - `Severe`: cannot succeed during this attempt; stop immediately.
//! - `Timeout`: the deadline (or cancellation) hit while only minor reasons were seen.
//! - `Aggregate`: one entry per failed unit of a collect-all run.
//! - `AmbiguousMigration`: backup ownership cannot be decided safely.

use std::time::Duration;

use crate::codes::{has_non_retryable, ErrorCode};

/// Failure talking to the API server, classified by what a caller can do about it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Forbidden and invalid requests will fail the same way on every retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::Invalid(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Minor { message: String, codes: Vec<ErrorCode> },
    #[error("{message}")]
    Severe { message: String, codes: Vec<ErrorCode> },
    #[error("{}", timeout_message(.after, .cancelled, .last))]
    Timeout {
        after: Duration,
        cancelled: bool,
        last: Option<Box<Error>>,
    },
    #[error("{}", aggregate_message(.0))]
    Aggregate(Vec<Error>),
    #[error("ambiguous migration: source and destination backup entries both reference bucket {bucket:?}")]
    AmbiguousMigration { bucket: String },
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl Error {
    pub fn minor(message: impl Into<String>) -> Self {
        Self::Minor { message: message.into(), codes: Vec::new() }
    }

    pub fn severe(message: impl Into<String>) -> Self {
        Self::Severe { message: message.into(), codes: Vec::new() }
    }

    /// Classify an extension-reported error: non-retryable codes make it severe.
    pub fn from_reported(message: impl Into<String>, codes: Vec<ErrorCode>) -> Self {
        let message = message.into();
        if has_non_retryable(&codes) {
            Self::Severe { message, codes }
        } else {
            Self::Minor { message, codes }
        }
    }

    pub fn is_severe(&self) -> bool {
        match self {
            Self::Severe { .. } | Self::AmbiguousMigration { .. } => true,
            Self::Timeout { cancelled, .. } => *cancelled,
            Self::Client(e) => e.is_permanent(),
            Self::Aggregate(errs) => errs.iter().any(Error::is_severe),
            Self::Minor { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Entries of an aggregate; a non-aggregate error is its own single entry.
    pub fn causes(&self) -> &[Error] {
        match self {
            Self::Aggregate(errs) => errs,
            other => std::slice::from_ref(other),
        }
    }

    /// Error codes carried by this error, looking through timeouts and aggregates.
    pub fn codes(&self) -> Vec<ErrorCode> {
        let mut out = Vec::new();
        self.collect_codes(&mut out);
        out
    }

    fn collect_codes(&self, out: &mut Vec<ErrorCode>) {
        match self {
            Self::Minor { codes, .. } | Self::Severe { codes, .. } => {
                for c in codes {
                    if !out.contains(c) {
                        out.push(*c);
                    }
                }
            }
            Self::Timeout { last: Some(last), .. } => last.collect_codes(out),
            Self::Aggregate(errs) => errs.iter().for_each(|e| e.collect_codes(out)),
            _ => {}
        }
    }
}

fn timeout_message(after: &Duration, cancelled: &bool, last: &Option<Box<Error>>) -> String {
    let what = if *cancelled { "cancelled" } else { "timed out" };
    match last {
        Some(last) => format!("{} after {:?}, last reason: {}", what, after, last),
        None => format!("{} after {:?}", what, after),
    }
}

fn aggregate_message(errs: &[Error]) -> String {
    let mut out = format!("{} error(s) occurred:", errs.len());
    for e in errs {
        out.push_str("\n* ");
        out.push_str(&e.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_keeps_last_reason() {
        let e = Error::Timeout {
            after: Duration::from_secs(30),
            cancelled: false,
            last: Some(Box::new(Error::minor("quota for instances exhausted"))),
        };
        let msg = e.to_string();
        assert!(msg.contains("timed out"), "msg={}", msg);
        assert!(msg.contains("quota for instances exhausted"), "msg={}", msg);
        assert!(!e.is_severe());
    }

    #[test]
    fn reported_errors_with_non_retryable_codes_are_severe() {
        assert!(Error::from_reported("bad config", vec![ErrorCode::ConfigurationProblem]).is_severe());
        assert!(!Error::from_reported("throttled", vec![ErrorCode::InfraRateLimitsExceeded]).is_severe());
    }

    #[test]
    fn aggregate_keeps_entry_classification() {
        let agg = Error::Aggregate(vec![
            Error::minor("still converging"),
            Error::Severe { message: "denied".into(), codes: vec![ErrorCode::InfraUnauthorized] },
        ]);
        assert_eq!(agg.causes().len(), 2);
        assert!(agg.is_severe());
        assert_eq!(agg.codes(), vec![ErrorCode::InfraUnauthorized]);
        assert!(agg.to_string().starts_with("2 error(s) occurred:"));
    }

    #[test]
    fn client_errors_classify() {
        assert!(Error::from(ClientError::Forbidden("x".into())).is_severe());
        assert!(!Error::from(ClientError::Transient("x".into())).is_severe());
    }
}
