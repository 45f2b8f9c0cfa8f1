use ulid::Ulid;

use crate::model::{BookingStatus, Span};

/// Which scheduling scope an overlap was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// The requesting user already holds an overlapping booking.
    User,
    /// The expert already has an overlapping booking.
    Expert,
    /// A new slot overlaps one the expert already published.
    Slot,
    /// An entity with the same id is already registered.
    Duplicate,
}

impl ConflictScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictScope::User => "user",
            ConflictScope::Expert => "expert",
            ConflictScope::Slot => "slot",
            ConflictScope::Duplicate => "duplicate",
        }
    }
}

/// Stable, caller-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unauthorized,
    Policy,
    InvalidTransition,
    Transient,
    Validation,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Policy => "policy",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound {
        entity: &'static str,
        id: Ulid,
    },
    NoFreeSlot {
        expert_id: Ulid,
        span: Span,
    },
    Unavailable(Ulid),
    Conflict {
        scope: ConflictScope,
        with: Ulid,
    },
    Unauthorized(Ulid),
    Policy(&'static str),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    Transient(String),
    Validation(&'static str),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } | EngineError::NoFreeSlot { .. } => ErrorKind::NotFound,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::Policy(_) => ErrorKind::Policy,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::Transient(_) => ErrorKind::Transient,
            EngineError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Safe to retry as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::NoFreeSlot { expert_id, span } => write!(
                f,
                "no free slot of expert {expert_id} covers [{}, {})",
                span.start, span.end
            ),
            EngineError::Unavailable(id) => write!(f, "expert {id} is not accepting bookings"),
            EngineError::Conflict { scope, with } => match scope {
                ConflictScope::User => write!(f, "user conflict: overlaps booking {with}"),
                ConflictScope::Expert => write!(f, "expert conflict: overlaps booking {with}"),
                ConflictScope::Slot => write!(f, "slot conflict: overlaps slot {with}"),
                ConflictScope::Duplicate => write!(f, "already exists: {with}"),
            },
            EngineError::Unauthorized(actor) => write!(f, "actor {actor} is not allowed to do this"),
            EngineError::Policy(msg) => write!(f, "policy violation: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::Transient(e) => write!(f, "transient failure, retry: {e}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Transient(e.to_string())
    }
}
