//! boa-workflow: orquestación de campañas de optimización multiobjetivo
//!
//! Junta los componentes de `campaign-store` con las capacidades de
//! `boa-providers`:
//! - `StrategyExecutor`: una estrategia (sampler o modelo + adquisición)
//!   sobre una instantánea del conjunto de datos, con plazo y un
//!   reintento.
//! - Handlers de jobs (`propose`, `export`), el `Worker` y el
//!   `WorkerPool`.
//! - `CampaignAnalyzer`: métricas recalculadas a partir del log de
//!   observaciones.
//! - `CampaignEngine`: la fachada que consume el transporte.

pub mod analyzer;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod import;
pub mod worker;

pub use analyzer::{CampaignAnalyzer, CampaignMetrics, ConvergencePoint, ObjectiveBounds};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::{CampaignEngine, DEFAULT_STRATEGY};
pub use errors::{EngineError, Result, StrategyFailure};
pub use executor::{StrategyExecutor, StrategyOutcome, StrategyTask};
pub use handlers::{CampaignBundle, ExportJobHandler, IterationBundle, JobDispatcher, JobHandler, ProposeJobHandler,
                   EXPORT_FORMAT_VERSION};
pub use import::CampaignImporter;
pub use worker::{failure_result, Worker, WorkerPool, WorkerTiming};
