use crate::model::*;

/// Remaining units: `capacity - booked`, floored at zero.
pub fn vacancies(capacity: u32, booked_units: u32) -> u32 {
    capacity.saturating_sub(booked_units)
}

pub fn status(vacancies: u32) -> AvailabilityStatus {
    if vacancies > 0 {
        AvailabilityStatus::Available
    } else {
        AvailabilityStatus::SoldOut
    }
}

/// Derive the caller-facing record from the row as it is right now.
/// Callers must hold at least a read lock on the row.
pub fn view(row: &AvailabilityState) -> Availability {
    let vacancies = vacancies(row.capacity, row.booked_units());
    Availability {
        id: row.id,
        product_id: row.product_id,
        local_date: row.date,
        status: status(vacancies),
        vacancies,
        available: vacancies > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn row_with(capacity: u32, bookings: &[usize]) -> AvailabilityState {
        let mut row = AvailabilityState::new(
            Ulid::new(),
            Ulid::new(),
            NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            capacity,
        );
        for &units in bookings {
            row.bookings.push(Booking {
                id: Ulid::new(),
                status: BookingStatus::Reserved,
                product_id: row.product_id,
                availability_id: row.id,
                units: (0..units)
                    .map(|_| Unit {
                        id: Ulid::new(),
                        ticket: None,
                    })
                    .collect(),
            });
        }
        row
    }

    #[test]
    fn partially_booked_is_available() {
        let v = view(&row_with(10, &[1, 2]));
        assert_eq!(v.vacancies, 7);
        assert_eq!(v.status, AvailabilityStatus::Available);
        assert!(v.available);
    }

    #[test]
    fn fully_booked_is_sold_out() {
        let v = view(&row_with(10, &[4, 6]));
        assert_eq!(v.vacancies, 0);
        assert_eq!(v.status, AvailabilityStatus::SoldOut);
        assert!(!v.available);
    }

    #[test]
    fn untouched_row_has_full_capacity() {
        let v = view(&row_with(5, &[]));
        assert_eq!(v.vacancies, 5);
    }

    #[test]
    fn vacancies_never_underflow() {
        assert_eq!(vacancies(2, 5), 0);
    }
}
