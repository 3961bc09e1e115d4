use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date, the only time type. Stays are counted in whole nights.
pub type Day = NaiveDate;

/// Half-open stay interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Day,
    pub end: Day,
}

impl Span {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `[start, start + nights)`. `None` if the end date is out of range.
    pub fn of_nights(start: Day, nights: u32) -> Option<Self> {
        let end = start.checked_add_days(Days::new(u64::from(nights)))?;
        Some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A persisted stay of a guest in a unit.
///
/// `check_out` is always `check_in + nights`. Build through [`Reservation::new`]
/// or [`Reservation::extended`], which derive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub guest_name: String,
    pub unit_id: String,
    pub check_in: Day,
    pub check_out: Day,
    pub nights: u32,
}

impl Reservation {
    pub fn new(id: Ulid, guest_name: String, unit_id: String, stay: Span) -> Self {
        Self {
            id,
            guest_name,
            unit_id,
            check_in: stay.start,
            check_out: stay.end,
            nights: stay.nights() as u32,
        }
    }

    pub fn stay(&self) -> Span {
        Span::new(self.check_in, self.check_out)
    }

    /// Same identity, new length. Guest, unit and check-in are untouched.
    pub fn extended(&self, check_out: Day, nights: u32) -> Self {
        Self {
            check_out,
            nights,
            ..self.clone()
        }
    }
}

/// Fields of a reservation before the repository assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest_name: String,
    pub unit_id: String,
    pub stay: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub guest_name: String,
    pub unit_id: String,
    pub check_in: Day,
    pub nights: u32,
}

/// Targets the reservation by (guest, unit), never by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendRequest {
    pub guest_name: String,
    pub unit_id: String,
    pub additional_nights: u32,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        guest_name: String,
        unit_id: String,
        check_in: Day,
        check_out: Day,
        nights: u32,
    },
    ReservationExtended {
        id: Ulid,
        check_out: Day,
        nights: u32,
    },
}

impl Event {
    pub fn created(r: &Reservation) -> Self {
        Event::ReservationCreated {
            id: r.id,
            guest_name: r.guest_name.clone(),
            unit_id: r.unit_id.clone(),
            check_in: r.check_in,
            check_out: r.check_out,
            nights: r.nights,
        }
    }
}
