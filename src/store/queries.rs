use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::vacancy::view;
use super::{Store, StoreError};

impl Store {
    pub fn get_product(&self, id: Ulid) -> Result<Product, StoreError> {
        self.tables
            .product(&id)
            .ok_or_else(|| StoreError::not_found("product", id))
    }

    /// All products, oldest first.
    pub fn list_products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .tables
            .products
            .iter()
            .map(|e| e.value().clone())
            .collect();
        products.sort_by_key(|p| p.id);
        products
    }

    /// Availability for one product on one date, if a row exists.
    pub async fn get(&self, product_id: Ulid, date: Date) -> Result<Option<Availability>, StoreError> {
        let calendar = self
            .tables
            .calendar(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        let id = calendar.read().await.get(&date).copied();
        match id {
            Some(id) => self.get_by_id(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Availability for `from..=to`, ordered by date. Dates with no row are skipped.
    pub async fn get_range(
        &self,
        product_id: Ulid,
        from: Date,
        to: Date,
    ) -> Result<Vec<Availability>, StoreError> {
        if from > to {
            return Err(StoreError::invalid(
                "localDateEnd",
                "localDateEnd must not be before localDateStart",
            ));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(StoreError::LimitExceeded("date range too wide"));
        }
        let calendar = self
            .tables
            .calendar(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        let ids: Vec<Ulid> = calendar
            .read()
            .await
            .range(from..=to)
            .map(|(_, &id)| id)
            .collect();

        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            result.push(self.get_by_id(id).await?);
        }
        Ok(result)
    }

    pub async fn get_by_id(&self, availability_id: Ulid) -> Result<Availability, StoreError> {
        let row = self
            .tables
            .row(&availability_id)
            .ok_or_else(|| StoreError::not_found("availability", availability_id))?;
        let guard = row.read().await;
        Ok(view(&guard))
    }

    /// The row with the greatest date for a product.
    pub async fn get_latest(&self, product_id: Ulid) -> Result<Option<Availability>, StoreError> {
        let calendar = self
            .tables
            .calendar(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        let id = calendar.read().await.last_key_value().map(|(_, &id)| id);
        match id {
            Some(id) => self.get_by_id(id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, StoreError> {
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
        let guard = row.read().await;
        guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("booking", booking_id))
    }
}
