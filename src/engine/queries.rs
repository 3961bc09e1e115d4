use crate::model::*;
use crate::repository::ReservationFilter;

use super::availability::{Outcome, check_availability};
use super::validate::{validate_identity, validate_nights};
use super::{Engine, EngineError};

impl Engine {
    /// Run the availability checks alone, without the duplicate-stay rule and
    /// without writing. Returns the stay that was evaluated with the verdict.
    pub async fn probe_availability(
        &self,
        unit_id: &str,
        guest_name: &str,
        check_in: Day,
        nights: u32,
    ) -> Result<(Span, Outcome), EngineError> {
        validate_identity(guest_name, unit_id)?;
        validate_nights(nights)?;
        let stay = Span::of_nights(check_in, nights)
            .ok_or(EngineError::InvalidRequest("check-out date out of range"))?;
        let outcome = check_availability(self.repo.as_ref(), unit_id, guest_name, &stay).await?;
        Ok((stay, outcome))
    }

    pub async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.repo.list(filter).await?)
    }
}
