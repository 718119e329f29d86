use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day with no time-of-day. Always interpreted in UTC.
pub type Date = NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Ulid,
    pub name: String,
    /// Max bookable units per date.
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    Available,
    SoldOut,
}

/// Availability as seen by callers: the stored (product, date) row plus the
/// vacancy figures derived from its bookings at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub id: Ulid,
    pub product_id: Ulid,
    pub local_date: Date,
    pub status: AvailabilityStatus,
    pub vacancies: u32,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Reserved,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    /// Absent until the booking is confirmed.
    pub ticket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub status: BookingStatus,
    pub product_id: Ulid,
    pub availability_id: Ulid,
    pub units: Vec<Unit>,
}

impl Booking {
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

/// In-memory row for one (product, date). Owns the bookings made against it so
/// the booked-unit count is always read from the same place it is written.
#[derive(Debug, Clone)]
pub struct AvailabilityState {
    pub id: Ulid,
    pub product_id: Ulid,
    pub date: Date,
    /// Copied from the product at creation; products are immutable.
    pub capacity: u32,
    /// Bookings in reservation order.
    pub bookings: Vec<Booking>,
}

impl AvailabilityState {
    pub fn new(id: Ulid, product_id: Ulid, date: Date, capacity: u32) -> Self {
        Self {
            id,
            product_id,
            date,
            capacity,
            bookings: Vec::new(),
        }
    }

    pub fn booked_units(&self) -> u32 {
        self.bookings.iter().map(|b| b.units.len() as u32).sum()
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }
}

/// Flat WAL record format: one variant per committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProductCreated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    AvailabilityInserted {
        product_id: Ulid,
        records: Vec<(Ulid, Date)>,
    },
    BookingReserved {
        id: Ulid,
        product_id: Ulid,
        availability_id: Ulid,
        unit_ids: Vec<Ulid>,
    },
    BookingConfirmed {
        id: Ulid,
        availability_id: Ulid,
        /// (unit id, ticket content), in unit order.
        tickets: Vec<(Ulid, String)>,
    },
}
