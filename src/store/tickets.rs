use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Booking;

#[derive(Debug, thiserror::Error)]
#[error("ticket issuing failed: {0}")]
pub struct IssueError(pub String);

/// Produces ticket content for a booking at confirmation time.
///
/// Must return exactly one non-empty ticket per unit, in unit order. The store
/// calls it while holding the availability row's write lock, so it should not
/// block for long.
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn issue(&self, booking: &Booking) -> Result<Vec<String>, IssueError>;
}

/// Issues opaque `TKT-<ulid>` codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidTicketIssuer;

#[async_trait]
impl TicketIssuer for UlidTicketIssuer {
    async fn issue(&self, booking: &Booking) -> Result<Vec<String>, IssueError> {
        Ok(booking
            .units
            .iter()
            .map(|_| format!("TKT-{}", Ulid::new()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    #[tokio::test]
    async fn one_distinct_ticket_per_unit() {
        let booking = Booking {
            id: Ulid::new(),
            status: BookingStatus::Reserved,
            product_id: Ulid::new(),
            availability_id: Ulid::new(),
            units: (0..3)
                .map(|_| Unit {
                    id: Ulid::new(),
                    ticket: None,
                })
                .collect(),
        };
        let tickets = UlidTicketIssuer.issue(&booking).await.unwrap();
        assert_eq!(tickets.len(), 3);
        assert!(tickets.iter().all(|t| t.starts_with("TKT-")));
        assert_ne!(tickets[0], tickets[1]);
    }
}
