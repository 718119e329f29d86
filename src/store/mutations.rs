use std::collections::BTreeSet;

use tokio::sync::{OwnedMutexGuard, OwnedRwLockWriteGuard};
use tracing::{debug, info, warn};
use ulid::{Generator, Ulid};

use crate::limits::*;
use crate::model::*;
use crate::observability::{CONFIRMATIONS_TOTAL, RESERVATIONS_TOTAL};

use super::vacancy::vacancies;
use super::{Calendar, Deadline, Store, StoreError, Tables};

/// `n` ids that sort in creation order.
fn monotonic_ids(n: usize) -> Result<Vec<Ulid>, StoreError> {
    let mut generator = Generator::new();
    (0..n)
        .map(|_| {
            generator
                .generate()
                .map_err(|e| StoreError::Internal(format!("id generation: {e}")))
        })
        .collect()
}

fn validate_units(units: i64) -> Result<usize, StoreError> {
    if units <= 0 {
        return Err(StoreError::invalid("units", "units must be greater than zero"));
    }
    if units > MAX_UNITS_PER_BOOKING {
        return Err(StoreError::invalid(
            "units",
            format!("units must not exceed {MAX_UNITS_PER_BOOKING}"),
        ));
    }
    Ok(units as usize)
}

fn reject_reservation(err: StoreError) -> StoreError {
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "rejected").increment(1);
    err
}

impl Store {
    pub async fn create_product(&self, name: &str, capacity: u32) -> Result<Product, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::invalid("name", "name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("product name too long"));
        }
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(StoreError::invalid(
                "capacity",
                format!("capacity must be between 1 and {MAX_CAPACITY}"),
            ));
        }

        let gate = self.enter(Deadline::none()).await?;
        let slots = self.product_slots.clone().lock_owned().await;
        if self.tables.products.len() >= self.product_limit {
            return Err(StoreError::LimitExceeded("too many products"));
        }
        let id = Ulid::new();
        let event = Event::ProductCreated {
            id,
            name: name.to_string(),
            capacity,
        };
        self.commit(
            gate,
            slots,
            event,
            |tables: &Tables, _: &mut OwnedMutexGuard<()>, event: &Event| tables.apply_product(event),
        )
        .await?;
        info!(product_id = %id, name, capacity, "product created");
        self.get_product(id)
    }

    /// Create one availability row per date for `product_id`, all or none.
    ///
    /// Fails without applying anything if any date already has a row for the
    /// product or appears twice in `dates`.
    pub async fn insert_many(
        &self,
        product_id: Ulid,
        dates: &[Date],
    ) -> Result<Vec<Availability>, StoreError> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }
        if dates.len() > MAX_INSERT_BATCH {
            return Err(StoreError::LimitExceeded("too many availability rows in one batch"));
        }

        let gate = self.enter(Deadline::none()).await?;
        let calendar = self
            .tables
            .calendar(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        let guard = calendar.write_owned().await;

        let mut seen = BTreeSet::new();
        for &date in dates {
            if guard.contains_key(&date) || !seen.insert(date) {
                return Err(StoreError::AlreadyExists { product_id, date });
            }
        }

        let records: Vec<(Ulid, Date)> = monotonic_ids(seen.len())?
            .into_iter()
            .zip(seen)
            .collect();
        let ids: Vec<Ulid> = records.iter().map(|&(id, _)| id).collect();
        let event = Event::AvailabilityInserted {
            product_id,
            records,
        };
        let guard = self
            .commit(
                gate,
                guard,
                event,
                |tables: &Tables, calendar: &mut OwnedRwLockWriteGuard<Calendar>, event: &Event| {
                    tables.apply_inserted(calendar, event)
                },
            )
            .await?;
        drop(guard);
        debug!(%product_id, rows = ids.len(), "availability inserted");

        let mut inserted = Vec::with_capacity(ids.len());
        for id in ids {
            inserted.push(self.get_by_id(id).await?);
        }
        Ok(inserted)
    }

    /// Reserve `units` against an availability row.
    ///
    /// The vacancy check and the insert happen under the row's write lock, so
    /// concurrent reservations on one row are linearized and can never book
    /// more than the product's capacity.
    pub async fn reserve(
        &self,
        product_id: Ulid,
        availability_id: Ulid,
        units: i64,
    ) -> Result<Booking, StoreError> {
        self.reserve_within(Deadline::none(), product_id, availability_id, units)
            .await
    }

    /// [`Store::reserve`], giving up with Unavailable if the row lock is not
    /// acquired before `deadline`.
    pub async fn reserve_within(
        &self,
        deadline: Deadline,
        product_id: Ulid,
        availability_id: Ulid,
        units: i64,
    ) -> Result<Booking, StoreError> {
        let units = validate_units(units).map_err(reject_reservation)?;

        let gate = self.enter(deadline).await?;
        let row = self
            .tables
            .row(&availability_id)
            .ok_or_else(|| StoreError::not_found("availability", availability_id))?;
        let guard = deadline.run(row.write_owned()).await?;

        if guard.product_id != product_id {
            return Err(reject_reservation(StoreError::invalid(
                "availabilityId",
                "availability does not belong to the product",
            )));
        }
        let vacant = vacancies(guard.capacity, guard.booked_units()) as usize;
        if units > vacant {
            debug!(%availability_id, units, vacant, "reservation over capacity");
            return Err(reject_reservation(StoreError::invalid(
                "units",
                "units is greater than availability vacancies",
            )));
        }

        let id = Ulid::new();
        let event = Event::BookingReserved {
            id,
            product_id,
            availability_id,
            unit_ids: monotonic_ids(units)?,
        };
        let guard = self
            .commit(
                gate,
                guard,
                event,
                |tables: &Tables, row: &mut OwnedRwLockWriteGuard<AvailabilityState>, event: &Event| {
                    tables.apply_to_row(row, event)
                },
            )
            .await?;
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
        debug!(booking_id = %id, %availability_id, units, "booking reserved");

        guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("booking {id} missing after commit")))
    }

    /// Reserve against an already-resolved record. Its `vacancies` is only a
    /// pre-check; the authoritative check runs under the row lock.
    pub async fn reserve_against(
        &self,
        availability: &Availability,
        units: i64,
    ) -> Result<Booking, StoreError> {
        if units > i64::from(availability.vacancies) {
            return Err(reject_reservation(StoreError::invalid(
                "units",
                "units is greater than availability vacancies",
            )));
        }
        self.reserve(availability.product_id, availability.id, units)
            .await
    }

    /// Move a RESERVED booking to CONFIRMED and fill in its tickets.
    pub async fn confirm(&self, booking_id: Ulid) -> Result<Booking, StoreError> {
        self.confirm_within(Deadline::none(), booking_id).await
    }

    /// [`Store::confirm`], giving up with Unavailable if the row lock and the
    /// tickets are not in hand before `deadline`.
    pub async fn confirm_within(&self, deadline: Deadline, booking_id: Ulid) -> Result<Booking, StoreError> {
        let gate = self.enter(deadline).await?;
        let availability_id = self
            .tables
            .booking_index
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        let row = self.tables.row(&availability_id).ok_or_else(|| {
            StoreError::Internal(format!(
                "booking {booking_id} points at missing availability {availability_id}"
            ))
        })?;
        let guard = deadline.run(row.write_owned()).await?;

        let booking = guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        if booking.is_confirmed() {
            metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => "rejected").increment(1);
            return Err(StoreError::invalid("bookingId", "booking already confirmed"));
        }

        let tickets = deadline.run(self.tickets.issue(&booking)).await?.map_err(|e| {
            warn!(%booking_id, error = %e, "ticket issuer failed");
            StoreError::Unavailable(e.to_string())
        })?;
        if tickets.len() != booking.units.len() || tickets.iter().any(|t| t.is_empty()) {
            return Err(StoreError::Internal(format!(
                "ticket issuer returned {} tickets for {} units",
                tickets.len(),
                booking.units.len()
            )));
        }

        let event = Event::BookingConfirmed {
            id: booking_id,
            availability_id,
            tickets: booking.units.iter().map(|u| u.id).zip(tickets).collect(),
        };
        let guard = self
            .commit(
                gate,
                guard,
                event,
                |tables: &Tables, row: &mut OwnedRwLockWriteGuard<AvailabilityState>, event: &Event| {
                    tables.apply_to_row(row, event)
                },
            )
            .await?;
        metrics::counter!(CONFIRMATIONS_TOTAL, "outcome" => "confirmed").increment(1);
        debug!(%booking_id, "booking confirmed");

        guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("booking {booking_id} missing after commit")))
    }
}
