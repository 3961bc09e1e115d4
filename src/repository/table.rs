use ulid::Ulid;

use crate::model::*;

use super::{OverlapQuery, ReservationFilter};

/// All reservations, sorted by `check_in`. Shared by both repositories.
#[derive(Debug, Default)]
pub struct ReservationTable {
    rows: Vec<Reservation>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.rows.iter()
    }

    /// Insert maintaining sort order by check-in. Equal check-ins keep insertion order.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .rows
            .partition_point(|r| r.check_in <= reservation.check_in);
        self.rows.insert(pos, reservation);
    }

    /// Rewrite check-out and nights in place. Check-in is unchanged, so order holds.
    pub fn extend(&mut self, id: Ulid, check_out: Day, nights: u32) -> Option<&Reservation> {
        let row = self.rows.iter_mut().find(|r| r.id == id)?;
        *row = row.extended(check_out, nights);
        Some(&*row)
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.rows.iter().find(|r| r.id == *id)
    }

    /// First reservation held by exactly this (guest, unit) pair.
    pub fn find_pair(&self, guest_name: &str, unit_id: &str) -> Option<&Reservation> {
        self.rows
            .iter()
            .find(|r| r.guest_name == guest_name && r.unit_id == unit_id)
    }

    /// Reservations whose stay overlaps `stay`.
    /// Uses binary search to skip reservations checking in at or after `stay.end`.
    pub fn overlapping(&self, stay: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.rows.partition_point(|r| r.check_in < stay.end);
        let stay = *stay;
        self.rows[..right_bound]
            .iter()
            .filter(move |r| r.check_out > stay.start)
    }

    pub fn find_overlapping(&self, query: &OverlapQuery<'_>) -> Vec<Reservation> {
        self.overlapping(&query.stay)
            .filter(|r| query.matches(r))
            .cloned()
            .collect()
    }

    pub fn list(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        self.rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }
}
