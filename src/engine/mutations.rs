use tracing::{debug, info};

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::availability::{Outcome, check_availability};
use super::validate::{validate_identity, validate_nights};
use super::{ConflictReason, Engine, EngineError};

fn rejected(reason: ConflictReason) -> EngineError {
    metrics::counter!(crate::observability::BOOKING_REJECTIONS_TOTAL, "reason" => reason.label())
        .increment(1);
    EngineError::Conflict(reason)
}

impl Engine {
    /// Book `nights` nights for a guest in a unit, starting at `check_in`.
    ///
    /// A guest may hold only one reservation per unit, whatever the dates.
    /// After that, the guest must be free and the unit unoccupied for the
    /// whole `[check_in, check_in + nights)`.
    pub async fn create_booking(&self, req: CreateRequest) -> Result<Reservation, EngineError> {
        validate_identity(&req.guest_name, &req.unit_id)?;
        validate_nights(req.nights)?;

        let _guard = self.locks.lock(&req.guest_name, &req.unit_id).await;

        if self
            .repo
            .find_existing_reservation(&req.guest_name, &req.unit_id)
            .await?
            .is_some()
        {
            debug!(guest = %req.guest_name, unit = %req.unit_id, "duplicate stay rejected");
            return Err(rejected(ConflictReason::DuplicateStay));
        }

        let stay = Span::of_nights(req.check_in, req.nights)
            .ok_or(EngineError::InvalidRequest("check-out date out of range"))?;

        if let Outcome::Rejected(reason) =
            check_availability(self.repo.as_ref(), &req.unit_id, &req.guest_name, &stay).await?
        {
            debug!(guest = %req.guest_name, unit = %req.unit_id, %reason, "booking rejected");
            return Err(rejected(reason));
        }

        let reservation = self
            .repo
            .create(NewReservation {
                guest_name: req.guest_name,
                unit_id: req.unit_id,
                stay,
            })
            .await?;

        info!(
            id = %reservation.id,
            guest = %reservation.guest_name,
            unit = %reservation.unit_id,
            check_in = %reservation.check_in,
            check_out = %reservation.check_out,
            "booking created"
        );
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Add nights to the guest's reservation for this unit.
    ///
    /// Only the added window `[check_out, check_out + additional_nights)` is
    /// checked. The reservation itself stays in the scan; it cannot conflict
    /// because the window starts exactly at its own check-out.
    pub async fn extend_booking(&self, req: ExtendRequest) -> Result<Reservation, EngineError> {
        validate_identity(&req.guest_name, &req.unit_id)?;
        validate_nights(req.additional_nights)?;

        let _guard = self.locks.lock(&req.guest_name, &req.unit_id).await;

        let existing = self
            .repo
            .find_existing_reservation(&req.guest_name, &req.unit_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                guest_name: req.guest_name.clone(),
                unit_id: req.unit_id.clone(),
            })?;

        let window = Span::of_nights(existing.check_out, req.additional_nights)
            .ok_or(EngineError::InvalidRequest("check-out date out of range"))?;

        if let Outcome::Rejected(reason) = check_availability(
            self.repo.as_ref(),
            &existing.unit_id,
            &existing.guest_name,
            &window,
        )
        .await?
        {
            debug!(id = %existing.id, %reason, "extension rejected");
            return Err(rejected(reason));
        }

        let nights = existing
            .nights
            .checked_add(req.additional_nights)
            .filter(|n| *n <= MAX_STAY_NIGHTS)
            .ok_or(EngineError::InvalidRequest("stay too long"))?;
        let check_out = Span::of_nights(existing.check_in, nights)
            .ok_or(EngineError::InvalidRequest("check-out date out of range"))?
            .end;

        let updated = self.repo.update(existing.id, check_out, nights).await?;

        info!(
            id = %updated.id,
            guest = %updated.guest_name,
            unit = %updated.unit_id,
            check_out = %updated.check_out,
            nights = updated.nights,
            "booking extended"
        );
        metrics::counter!(crate::observability::BOOKINGS_EXTENDED_TOTAL).increment(1);
        Ok(updated)
    }
}
