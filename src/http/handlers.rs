use std::future::Future;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::store::{Deadline, StoreError};

use super::AppState;
use super::error::{ApiError, InvalidParam};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a read under the per-request deadline. Expiry is reported as
/// Unavailable. Mutations take a [`Deadline`] instead, which stops at the
/// commit point.
async fn deadline<T>(
    state: &AppState,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(state.request_timeout, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            debug!(timeout_ms = state.request_timeout.as_millis() as u64, "request deadline expired");
            Err(ApiError::from(StoreError::Unavailable("request timed out".into())))
        }
    }
}

fn parse_id(name: &str, raw: &str, errors: &mut Vec<InvalidParam>) -> Option<Ulid> {
    match raw.parse::<Ulid>() {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(InvalidParam {
                name: name.into(),
                reason: format!("{name} is malformed"),
            });
            None
        }
    }
}

fn parse_date(name: &str, raw: &str, errors: &mut Vec<InvalidParam>) -> Option<Date> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errors.push(InvalidParam {
                name: name.into(),
                reason: format!("{name} must be a YYYY-MM-DD date"),
            });
            None
        }
    }
}

fn path_id(name: &str, raw: &str) -> Result<Ulid, ApiError> {
    let mut errors = Vec::new();
    parse_id(name, raw, &mut errors).ok_or_else(|| ApiError::invalid(errors))
}

pub async fn health(State(state): State<AppState>) -> StatusCode {
    if state.store.is_healthy() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn list_products(State(state): State<AppState>) -> Json<Vec<Product>> {
    Json(state.store.list_products())
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Product> {
    let id = path_id("id", &id)?;
    Ok(Json(state.store.get_product(id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub product_id: String,
    pub local_date: Option<String>,
    pub local_date_start: Option<String>,
    pub local_date_end: Option<String>,
}

#[derive(Debug)]
enum DateSelector {
    Day(Date),
    Range(Date, Date),
}

fn validate_availability(q: &AvailabilityQuery) -> Result<(Ulid, DateSelector), ApiError> {
    let mut errors = Vec::new();
    let product_id = parse_id("productId", &q.product_id, &mut errors);
    let selector = match (&q.local_date, &q.local_date_start, &q.local_date_end) {
        (Some(day), None, None) => parse_date("localDate", day, &mut errors).map(DateSelector::Day),
        (None, Some(start), Some(end)) => {
            let start = parse_date("localDateStart", start, &mut errors);
            let end = parse_date("localDateEnd", end, &mut errors);
            start.zip(end).map(|(s, e)| DateSelector::Range(s, e))
        }
        _ => {
            errors.push(InvalidParam {
                name: "localDate".into(),
                reason: "provide either localDate or both localDateStart and localDateEnd".into(),
            });
            None
        }
    };
    match (product_id, selector) {
        (Some(id), Some(sel)) if errors.is_empty() => Ok((id, sel)),
        _ => Err(ApiError::invalid(errors)),
    }
}

pub async fn query_availability(
    State(state): State<AppState>,
    body: Result<Json<AvailabilityQuery>, JsonRejection>,
) -> ApiResult<Vec<Availability>> {
    let Json(query) = body?;
    let (product_id, selector) = validate_availability(&query)?;
    let store = &state.store;
    let rows = match selector {
        DateSelector::Day(day) => deadline(&state, store.get(product_id, day))
            .await?
            .into_iter()
            .collect(),
        DateSelector::Range(from, to) => deadline(&state, store.get_range(product_id, from, to)).await?,
    };
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    pub product_id: String,
    pub availability_id: String,
    pub units: i64,
}

pub async fn create_booking(
    State(state): State<AppState>,
    body: Result<Json<CreateBooking>, JsonRejection>,
) -> ApiResult<Booking> {
    let Json(req) = body?;
    let mut errors = Vec::new();
    let product_id = parse_id("productId", &req.product_id, &mut errors);
    let availability_id = parse_id("availabilityId", &req.availability_id, &mut errors);
    let (Some(product_id), Some(availability_id)) = (product_id, availability_id) else {
        return Err(ApiError::invalid(errors));
    };

    // Unknown product is a 404, not an ownership mismatch.
    state.store.get_product(product_id)?;
    let booking = state
        .store
        .reserve_within(
            Deadline::after(state.request_timeout),
            product_id,
            availability_id,
            req.units,
        )
        .await?;
    Ok(Json(booking))
}

pub async fn get_booking(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Booking> {
    let id = path_id("id", &id)?;
    Ok(Json(deadline(&state, state.store.get_booking(id)).await?))
}

pub async fn confirm_booking(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Booking> {
    let id = path_id("id", &id)?;
    let booking = state
        .store
        .confirm_within(Deadline::after(state.request_timeout), id)
        .await?;
    Ok(Json(booking))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(product_id: &str, day: Option<&str>, start: Option<&str>, end: Option<&str>) -> AvailabilityQuery {
        AvailabilityQuery {
            product_id: product_id.into(),
            local_date: day.map(Into::into),
            local_date_start: start.map(Into::into),
            local_date_end: end.map(Into::into),
        }
    }

    #[test]
    fn single_day_or_range() {
        let id = Ulid::new().to_string();
        let (_, sel) = validate_availability(&query(&id, Some("2025-04-01"), None, None)).unwrap();
        assert!(matches!(sel, DateSelector::Day(_)));
        let (_, sel) =
            validate_availability(&query(&id, None, Some("2025-04-01"), Some("2025-04-03"))).unwrap();
        assert!(matches!(sel, DateSelector::Range(_, _)));
    }

    #[test]
    fn reports_every_bad_field() {
        let err = validate_availability(&query("nope", None, Some("2025-13-01"), Some("x"))).unwrap_err();
        let names: Vec<&str> = err.invalid_params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["productId", "localDateStart", "localDateEnd"]);
    }

    #[test]
    fn ambiguous_selector_is_rejected() {
        let id = Ulid::new().to_string();
        let err = validate_availability(&query(&id, Some("2025-04-01"), Some("2025-04-01"), None)).unwrap_err();
        assert_eq!(err.invalid_params[0].name, "localDate");
        assert!(validate_availability(&query(&id, None, None, None)).is_err());
    }
}
