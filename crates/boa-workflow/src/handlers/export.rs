// Handler de jobs `export`: paquete JSON autocontenido de una campaña.
// Sólo lee datos inmutables, así que no toma el lock de escritura.
use super::JobHandler;
use crate::context::EngineContext;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use campaign_domain::{Campaign, Decision, Iteration, Job, JobType, Observation, ProcessSpec, Proposal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// Versión del formato del paquete exportado.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Paquete de exportación. Es también la entrada de la importación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBundle {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub campaign: Campaign,
    pub process: ProcessSpec,
    pub observations: Vec<Observation>,
    pub iterations: Vec<IterationBundle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationBundle {
    pub iteration: Iteration,
    pub proposals: Vec<Proposal>,
    pub decision: Option<Decision>,
}

pub struct ExportJobHandler {
    ctx: Arc<EngineContext>,
}

impl ExportJobHandler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn collect(&self, campaign_id: &Uuid) -> Result<CampaignBundle> {
        let ctx = &self.ctx;
        let campaign = ctx.states.get(campaign_id)?;
        let process = ctx.store.get_process(&campaign.process_id)?;
        let observations = ctx.store.list_observations(campaign_id)?;
        let mut iterations = Vec::new();
        for iteration in ctx.ledger.list_iterations(campaign_id)? {
            let proposals = ctx.ledger.list_proposals(&iteration.id)?;
            let decision = ctx.ledger.get_decision(&iteration.id)?;
            iterations.push(IterationBundle { iteration, proposals, decision });
        }
        Ok(CampaignBundle { format_version: EXPORT_FORMAT_VERSION,
                            exported_at: Utc::now(),
                            campaign,
                            process,
                            observations,
                            iterations })
    }

    pub fn build_bundle(&self, campaign_id: &Uuid) -> Result<JsonValue> {
        Ok(serde_json::to_value(self.collect(campaign_id)?)?)
    }
}

#[async_trait]
impl JobHandler for ExportJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Export
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue> {
        let campaign_id = job.campaign_id
                             .ok_or_else(|| EngineError::Validation(format!("el job {} no tiene campaña", job.id)))?;
        let bundle = self.build_bundle(&campaign_id)?;
        log::info!("job {}: campaña {} exportada", job.id, campaign_id);
        Ok(bundle)
    }
}
