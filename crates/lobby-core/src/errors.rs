use std::fmt;

use crate::messages::CloseCause;

/// Why a connection was refused at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Banned,
    Busy,
}

impl Rejection {
    /// Cause code sent in the terminal `bye`. Banned addresses are told `kick`.
    pub fn close_cause(self) -> CloseCause {
        match self {
            Self::Banned => CloseCause::Kick,
            Self::Busy => CloseCause::Busy,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Banned => f.write_str("banned"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

/// Moderation rule a message tripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    Shouting,
    Similarity,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shouting => f.write_str("shouting"),
            Self::Similarity => f.write_str("similar to a filtered word"),
        }
    }
}

/// Per-connection faults. None of these outlive the offending session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("admission rejected: {0}")]
    AdmissionRejected(Rejection),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("moderation violation: {0}")]
    ModerationViolation(Violation),
}

impl RoomError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AdmissionRejected(Rejection::Banned) => "admission_banned",
            Self::AdmissionRejected(Rejection::Busy) => "admission_busy",
            Self::MalformedMessage(_) => "malformed_message",
            Self::ModerationViolation(Violation::Shouting) => "shouting",
            Self::ModerationViolation(Violation::Similarity) => "similarity",
        }
    }
}
