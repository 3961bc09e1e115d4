mod durable;
mod memory;
mod table;

pub use durable::WalRepository;
pub use memory::InMemoryRepository;
pub use table::ReservationTable;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

/// Storage the booking engine reads from and writes to. The engine owns no state
/// of its own; everything persisted goes through this trait.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a new reservation and assign its id.
    async fn create(&self, new: NewReservation) -> Result<Reservation, RepositoryError>;

    /// Rewrite check-out and nights of an existing reservation.
    async fn update(
        &self,
        id: Ulid,
        check_out: Day,
        nights: u32,
    ) -> Result<Reservation, RepositoryError>;

    /// First reservation held by exactly this (guest, unit) pair.
    async fn find_existing_reservation(
        &self,
        guest_name: &str,
        unit_id: &str,
    ) -> Result<Option<Reservation>, RepositoryError>;

    async fn find_overlapping(
        &self,
        query: &OverlapQuery<'_>,
    ) -> Result<Vec<Reservation>, RepositoryError>;

    /// All reservations matching `filter`, ordered by check-in.
    async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, RepositoryError>;
}

/// Reservations overlapping `stay`, ANDed with whichever identity is given.
#[derive(Debug, Clone, Copy)]
pub struct OverlapQuery<'a> {
    pub guest_name: Option<&'a str>,
    pub unit_id: Option<&'a str>,
    pub stay: Span,
}

impl<'a> OverlapQuery<'a> {
    pub fn guest(guest_name: &'a str, stay: Span) -> Self {
        Self {
            guest_name: Some(guest_name),
            unit_id: None,
            stay,
        }
    }

    pub fn unit(unit_id: &'a str, stay: Span) -> Self {
        Self {
            guest_name: None,
            unit_id: Some(unit_id),
            stay,
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.guest_name.is_none_or(|g| r.guest_name == g)
            && self.unit_id.is_none_or(|u| r.unit_id == u)
            && r.stay().overlaps(&self.stay)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub guest_name: Option<String>,
    pub unit_id: Option<String>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.guest_name.as_deref().is_none_or(|g| r.guest_name == g)
            && self.unit_id.as_deref().is_none_or(|u| r.unit_id == u)
    }
}

#[derive(Debug)]
pub enum RepositoryError {
    NotFound(Ulid),
    WalError(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::NotFound(id) => write!(f, "reservation not found: {id}"),
            RepositoryError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for RepositoryError {}
