use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::store::{Store, StoreError};

#[derive(Debug, Deserialize)]
struct SeedProduct {
    name: String,
    capacity: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("creating seed product: {0}")]
    Store(#[from] StoreError),
}

/// Create the products listed in `path` if the store has none yet.
/// Returns how many were created.
pub async fn seed_products(store: &Store, path: &Path) -> Result<usize, SeedError> {
    if !store.list_products().is_empty() {
        info!("store already has products, skipping seed");
        return Ok(0);
    }
    let raw = tokio::fs::read(path).await?;
    let seed: Vec<SeedProduct> = serde_json::from_slice(&raw)?;
    for p in &seed {
        store.create_product(&p.name, p.capacity).await?;
    }
    info!(path = %path.display(), products = seed.len(), "seeded products");
    Ok(seed.len())
}
