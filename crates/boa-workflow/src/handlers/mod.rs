// Handlers de jobs y la tabla que los despacha por tipo.
mod export;
pub(crate) mod propose;

pub use export::{CampaignBundle, ExportJobHandler, IterationBundle, EXPORT_FORMAT_VERSION};
pub use propose::ProposeJobHandler;

use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use campaign_domain::{Job, JobType};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Ejecuta un tipo de job. El `JsonValue` devuelto se guarda como
/// resultado del job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job) -> Result<JsonValue>;
}

/// Tabla de handlers por tipo de job.
#[derive(Default, Clone)]
pub struct JobDispatcher {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handles(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Un tipo sin handler falla con `Validation` en lugar de quedarse
    /// colgado.
    pub async fn dispatch(&self, job: &Job) -> Result<JsonValue> {
        match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(job).await,
            None => Err(EngineError::Validation(format!("no hay handler para jobs de tipo {}", job.job_type))),
        }
    }
}
