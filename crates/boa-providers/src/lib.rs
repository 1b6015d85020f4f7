//! boa-providers: capacidades numéricas que consume el motor de campañas.
//!
//! Define los traits `Sampler`, `SurrogateModel`/`FittedModel`,
//! `Acquisition`, `Dominance` y `SpaceEncoder`, un catálogo por nombre
//! (`CapabilityRegistry`) y unas implementaciones de referencia pequeñas
//! en `builtin`.
pub mod builtin;
pub mod errors;
pub mod registry;
pub mod traits;

pub use errors::{ProviderError, Result};
pub use registry::CapabilityRegistry;
pub use traits::*;
