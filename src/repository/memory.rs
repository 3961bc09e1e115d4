use async_trait::async_trait;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{OverlapQuery, Repository, RepositoryError, ReservationFilter, ReservationTable};

/// Volatile repository. Nothing survives a restart; used in tests and as a fake.
#[derive(Default)]
pub struct InMemoryRepository {
    table: RwLock<ReservationTable>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create(&self, new: NewReservation) -> Result<Reservation, RepositoryError> {
        let reservation = Reservation::new(Ulid::new(), new.guest_name, new.unit_id, new.stay);
        self.table.write().await.insert(reservation.clone());
        Ok(reservation)
    }

    async fn update(
        &self,
        id: Ulid,
        check_out: Day,
        nights: u32,
    ) -> Result<Reservation, RepositoryError> {
        self.table
            .write()
            .await
            .extend(id, check_out, nights)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn find_existing_reservation(
        &self,
        guest_name: &str,
        unit_id: &str,
    ) -> Result<Option<Reservation>, RepositoryError> {
        Ok(self.table.read().await.find_pair(guest_name, unit_id).cloned())
    }

    async fn find_overlapping(
        &self,
        query: &OverlapQuery<'_>,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.table.read().await.find_overlapping(query))
    }

    async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.table.read().await.list(filter))
    }
}
