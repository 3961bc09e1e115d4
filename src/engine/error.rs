use crate::repository::RepositoryError;

/// Why a proposed stay was refused. `Display` yields the exact reason string
/// clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The guest already holds a reservation for this unit, whatever the dates.
    DuplicateStay,
    /// The guest is already somewhere else for part of the stay.
    GuestElsewhere,
    /// Another reservation occupies the unit for part of the stay.
    UnitOccupied,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::DuplicateStay => {
                "the given guest name cannot book the same unit multiple times"
            }
            ConflictReason::GuestElsewhere => {
                "the same guest cannot be in multiple units at the same time"
            }
            ConflictReason::UnitOccupied => {
                "for the given check-in date, the unit is already occupied"
            }
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ConflictReason::DuplicateStay => "duplicate_stay",
            ConflictReason::GuestElsewhere => "guest_elsewhere",
            ConflictReason::UnitOccupied => "unit_occupied",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const NOT_FOUND_REASON: &str = "no existing booking found for this guest and unit";

#[derive(Debug)]
pub enum EngineError {
    Conflict(ConflictReason),
    NotFound { guest_name: String, unit_id: String },
    InvalidRequest(&'static str),
    Repository(RepositoryError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Conflict(reason) => write!(f, "{reason}"),
            EngineError::NotFound { .. } => f.write_str(NOT_FOUND_REASON),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Repository(e) => write!(f, "repository error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Repository(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        EngineError::Repository(e)
    }
}
