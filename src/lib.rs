pub mod config;
pub mod health;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod replenish;
pub mod seed;
pub mod store;
pub mod wal;
