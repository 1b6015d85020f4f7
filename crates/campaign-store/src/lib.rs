//! Crate `campaign-store`: contratos de persistencia y coordinación del
//! motor de campañas.
//!
//! Contiene los traits de repositorio (`CampaignStore` agrupa todos), un
//! almacén en memoria para pruebas (`InMemoryCampaignStore`) y los
//! componentes que se apoyan sobre ellos:
//! - `LeaseLockCoordinator`: lock de escritura por campaña con leases.
//! - `JobQueue`: cola durable con dequeue atómico.
//! - `ProposalLedger`: iteraciones, propuestas, decisiones y contrafactuales.
//! - `ModelCheckpointer`: blobs de modelos y su retención.
//! - `CampaignStateController`: transiciones legales de una campaña.
//!
//! ```rust
//! use campaign_store::{InMemoryCampaignStore, JobQueue};
//! use std::sync::Arc;
//! let store = Arc::new(InMemoryCampaignStore::new());
//! let queue = JobQueue::new(store);
//! assert!(queue.dequeue("worker-0").unwrap().is_none());
//! ```
pub mod checkpointer;
pub mod errors;
pub mod ledger;
pub mod lock;
pub mod queue;
pub mod repository;
pub mod state;
pub mod stubs;

pub use checkpointer::*;
pub use errors::*;
pub use ledger::*;
pub use lock::*;
pub use queue::*;
pub use repository::*;
pub use state::*;
pub use stubs::*;
