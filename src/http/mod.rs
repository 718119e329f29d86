//! JSON-over-HTTP surface under `/api/v1`.

mod error;
mod handlers;
mod middleware;

pub use error::{ApiError, InvalidParam};
pub use middleware::CORRELATION_ID_HEADER;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};

use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/products", get(handlers::list_products))
        .route("/products/{id}", get(handlers::get_product))
        .route("/availability", post(handlers::query_availability))
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/{id}", get(handlers::get_booking))
        .route("/bookings/{id}/confirm", post(handlers::confirm_booking))
        // route_layer so the matched path is known for metric labels.
        .route_layer(axum::middleware::from_fn(middleware::track_request))
        .with_state(state);
    Router::new().nest("/api/v1", api)
}
