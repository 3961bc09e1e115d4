use crate::model::*;
use crate::repository::{OverlapQuery, Repository, RepositoryError};

use super::ConflictReason;

/// Verdict on a proposed stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Admitted,
    Rejected(ConflictReason),
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted)
    }

    /// `"OK"` when admitted, otherwise the rejection reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Outcome::Admitted => "OK",
            Outcome::Rejected(reason) => reason.as_str(),
        }
    }
}

// ── Availability checks ─────────────────────────────────────

/// Decide whether `guest_name` may occupy `unit_id` for `stay`.
///
/// Checks run in a fixed order and the first failure wins:
/// 1. the guest overlaps any of their own reservations, in any unit;
/// 2. the unit overlaps any reservation, by any guest.
///
/// Overlap is half-open, so a stay starting on another's check-out is free.
/// Nothing is excluded from either scan. Performs no writes.
pub async fn check_availability(
    repo: &dyn Repository,
    unit_id: &str,
    guest_name: &str,
    stay: &Span,
) -> Result<Outcome, RepositoryError> {
    let guest_busy = repo
        .find_overlapping(&OverlapQuery::guest(guest_name, *stay))
        .await?;
    if !guest_busy.is_empty() {
        return Ok(Outcome::Rejected(ConflictReason::GuestElsewhere));
    }

    let unit_busy = repo
        .find_overlapping(&OverlapQuery::unit(unit_id, *stay))
        .await?;
    if !unit_busy.is_empty() {
        return Ok(Outcome::Rejected(ConflictReason::UnitOccupied));
    }

    Ok(Outcome::Admitted)
}
