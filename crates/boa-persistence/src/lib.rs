//! Persistencia durable del motor de campañas.
//!
//! `DieselCampaignStore` implementa todos los traits de `campaign-store`
//! sobre Diesel (SQLite por defecto, Postgres con la feature `pg`).
//! `FsBlobStore` guarda los blobs de checkpoints en disco.

mod blob;
mod rows;
pub mod schema;
mod store;

pub use blob::FsBlobStore;
pub use store::{DieselCampaignStore, MIGRATIONS};

use campaign_store::{Result, StoreError};

/// Abre el almacén en `database_url` (la que resuelve la configuración del
/// motor). Rechaza de entrada una URL del backend que no se compiló.
pub fn open(database_url: &str) -> Result<DieselCampaignStore> {
  check_url(database_url)?;
  DieselCampaignStore::new(database_url)
}

#[cfg(feature = "pg")]
fn check_url(url: &str) -> Result<()> {
  let l = url.to_lowercase();
  if l.starts_with("postgres://") || l.starts_with("postgresql://") || url.contains('@') {
    Ok(())
  } else {
    Err(StoreError::Other(format!("{} no parece una URL de Postgres", url)))
  }
}

#[cfg(not(feature = "pg"))]
fn check_url(url: &str) -> Result<()> {
  let l = url.to_lowercase();
  if l.starts_with("postgres://") || l.starts_with("postgresql://") {
    return Err(StoreError::Other("boa-persistence se compiló sin la feature 'pg'; actívala para usar Postgres".into()));
  }
  Ok(())
}
