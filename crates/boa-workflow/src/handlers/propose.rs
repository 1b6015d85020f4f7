// Handler de jobs `propose`: una iteración nueva con una propuesta por
// estrategia, calculada bajo el lock de escritura de la campaña.
use super::JobHandler;
use crate::context::EngineContext;
use crate::errors::{EngineError, Result, StrategyFailure};
use crate::executor::{strategy_seed, StrategyOutcome, StrategyTask};
use async_trait::async_trait;
use campaign_domain::{Campaign, CampaignStatus, CheckpointBundle, DatasetSnapshot, Job, JobType, ModelBlob, NewProposal,
                      ProcessSpec, ProposeParams, StrategyConfig};
use campaign_store::Lease;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

pub struct ProposeJobHandler {
    ctx: Arc<EngineContext>,
}

impl ProposeJobHandler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    async fn run_locked(&self, job: &Job, campaign_id: Uuid, params: &ProposeParams, lease: Lease) -> Result<JsonValue> {
        let ctx = &self.ctx;
        let campaign = ctx.states.get(&campaign_id)?;
        // Pausar no cancela jobs ya encolados.
        if !matches!(campaign.status, CampaignStatus::Active | CampaignStatus::Paused) {
            return Err(EngineError::CampaignNotActive { campaign_id, status: campaign.status });
        }
        let spec = Arc::new(ctx.store.get_process(&campaign.process_id)?);
        let strategies = select_strategies(&campaign, params.strategy_names.as_deref())?;
        let batch_size = params.batch_size.unwrap_or(ctx.config.default_batch_size);
        if batch_size == 0 {
            return Err(EngineError::Validation("batch_size debe ser al menos 1".into()));
        }
        let ref_point = maximization_ref_point(&spec, params.ref_point.as_deref())?;

        let observations = ctx.store.list_observations(&campaign_id)?;
        let snapshot = Arc::new(DatasetSnapshot::from_observations(&spec, &observations));
        log::info!("job {}: iteración sobre {} observaciones (hash {}) con {} estrategias",
                   job.id,
                   snapshot.len(),
                   snapshot.hash,
                   strategies.len());
        self.report(job, 0.1)?;

        // Estrategias hermanas en paralelo sobre la misma instantánea.
        let handles: Vec<_> = strategies.iter()
                                        .enumerate()
                                        .map(|(position, (name, config))| {
                                            let task = StrategyTask { strategy_name: name.clone(),
                                                                      config: config.clone(),
                                                                      spec: spec.clone(),
                                                                      snapshot: snapshot.clone(),
                                                                      batch_size,
                                                                      ref_point: ref_point.clone(),
                                                                      initial_design: params.initial_design,
                                                                      seed: strategy_seed(params.seed,
                                                                                          position,
                                                                                          &snapshot.hash,
                                                                                          name) };
                                            let executor = ctx.executor.clone();
                                            tokio::spawn(async move { executor.execute(task).await })
                                        })
                                        .collect();

        let mut proposals: Vec<NewProposal> = Vec::new();
        let mut models: Vec<ModelBlob> = Vec::new();
        let mut failures: Vec<StrategyFailure> = Vec::new();
        let total = strategies.len() as f64;
        for (done, ((name, _), handle)) in strategies.iter().zip(handles).enumerate() {
            let outcome = handle.await;
            self.report(job, 0.1 + 0.7 * (done + 1) as f64 / total)?;
            match outcome {
                Ok(Ok(StrategyOutcome { proposal, model })) => {
                    proposals.push(proposal);
                    models.extend(model);
                }
                Ok(Err(EngineError::StrategyExecutionFailed { strategy_name, cause })) => {
                    failures.push(StrategyFailure { strategy_name, cause });
                }
                Ok(Err(other)) => failures.push(StrategyFailure { strategy_name: name.clone(), cause: other.to_string() }),
                Err(join) => failures.push(StrategyFailure { strategy_name: name.clone(),
                                                             cause: format!("la tarea terminó abruptamente: {}", join) }),
            }
        }
        if proposals.is_empty() {
            log::error!("job {}: fallaron todas las estrategias", job.id);
            return Err(EngineError::AllStrategiesFailed { failures });
        }

        let metadata = json!({
            "job_id": job.id,
            "dataset_size": snapshot.len(),
            "batch_size": batch_size,
            "initial_design": params.initial_design || snapshot.is_empty(),
            "failed_strategies": failures,
        });
        // Último punto para abandonar si el job dejó de ser de este worker:
        // después la iteración ya es durable.
        self.report(job, 0.9)?;
        let (iteration, stored) =
            ctx.ledger.commit_iteration(&campaign_id, &snapshot.hash, metadata, proposals, Some(&lease))?;

        // El checkpoint no es crítico: la iteración ya es durable.
        let mut checkpoint_id = None;
        let mut checkpoint_error = None;
        if !models.is_empty() {
            match self.save_checkpoint(campaign_id, iteration.id, models, &lease) {
                Ok(id) => checkpoint_id = Some(id),
                Err(e) => {
                    log::warn!("job {}: no se pudo guardar el checkpoint: {}", job.id, e);
                    checkpoint_error = Some(e.to_string());
                }
            }
        }

        let outcome = if failures.is_empty() { "complete" } else { "partial" };
        log::info!("job {}: iteración {} confirmada ({}, {} propuestas)", job.id, iteration.index, outcome, stored.len());
        Ok(json!({
            "iteration_id": iteration.id,
            "iteration_index": iteration.index,
            "dataset_hash": iteration.dataset_hash,
            "proposal_ids": stored.iter().map(|p| p.id).collect::<Vec<_>>(),
            "proposals": stored.iter()
                               .map(|p| json!({ "proposal_id": p.id,
                                                "strategy_name": p.strategy_name,
                                                "n_candidates": p.candidates.len() }))
                               .collect::<Vec<_>>(),
            "outcome": outcome,
            "failed_strategies": failures,
            "checkpoint_id": checkpoint_id,
            "checkpoint_error": checkpoint_error,
        }))
    }

    /// Avance del job. Falla con `JobCrashed` si el worker que lo ejecuta
    /// ya no es su dueño (se declaró huérfano). Sin dueño no hay nada que
    /// reportar.
    fn report(&self, job: &Job, progress: f64) -> Result<()> {
        let Some(owner) = job.worker_id.as_deref() else {
            return Ok(());
        };
        if !self.ctx.queue.update_progress(&job.id, owner, progress)? {
            log::warn!("job {}: el worker {} perdió el job, se abandona la iteración", job.id, owner);
            return Err(EngineError::JobCrashed { job_id: job.id });
        }
        Ok(())
    }

    fn save_checkpoint(&self, campaign_id: Uuid, iteration_id: Uuid, models: Vec<ModelBlob>, lease: &Lease) -> Result<Uuid> {
        let ctx = &self.ctx;
        let strategies: Vec<String> = models.iter().map(|m| m.strategy_name.clone()).collect();
        let bundle = CheckpointBundle::new(models);
        let bytes = serde_json::to_vec(&bundle).map_err(|e| EngineError::CheckpointIo(e.to_string()))?;
        let checkpoint = ctx.checkpointer
                            .save(&campaign_id,
                                  &iteration_id,
                                  &bytes,
                                  json!({ "format_version": bundle.format_version, "strategies": strategies }),
                                  Some(lease))
                            .map_err(|e| EngineError::CheckpointIo(e.to_string()))?;
        // La limpieza registra sus propios fallos y nunca borra el último.
        if let Err(e) = ctx.checkpointer.cleanup(&campaign_id, ctx.config.checkpoint_keep_last) {
            log::warn!("limpieza de checkpoints de la campaña {} fallida: {}", campaign_id, e);
        }
        Ok(checkpoint.id)
    }
}

#[async_trait]
impl JobHandler for ProposeJobHandler {
    fn job_type(&self) -> JobType {
        JobType::Propose
    }

    async fn handle(&self, job: &Job) -> Result<JsonValue> {
        let campaign_id = job.campaign_id
                             .ok_or_else(|| EngineError::Validation(format!("el job {} no tiene campaña", job.id)))?;
        let params: ProposeParams = serde_json::from_value(job.params.clone())?;
        let token = format!("job:{}", job.id);
        self.ctx
            .with_write_lock(campaign_id, &token, |lease| self.run_locked(job, campaign_id, &params, lease))
            .await
    }
}

/// Estrategias a ejecutar en el orden de la campaña. Con filtro, los
/// nombres desconocidos son un error de validación.
pub(crate) fn select_strategies(campaign: &Campaign, names: Option<&[String]>) -> Result<Vec<(String, StrategyConfig)>> {
    let selected: Vec<(String, StrategyConfig)> = match names {
        None => campaign.strategies.iter().map(|(n, c)| (n.clone(), c.clone())).collect(),
        Some(names) => {
            if let Some(unknown) = names.iter().find(|n| !campaign.strategies.contains_key(n.as_str())) {
                return Err(EngineError::Validation(format!("estrategia desconocida en la campaña: {}", unknown)));
            }
            campaign.strategies
                    .iter()
                    .filter(|(n, _)| names.iter().any(|x| x == *n))
                    .map(|(n, c)| (n.clone(), c.clone()))
                    .collect()
        }
    };
    if selected.is_empty() {
        return Err(EngineError::Validation(format!("la campaña {} no tiene estrategias que ejecutar", campaign.id)));
    }
    Ok(selected)
}

/// El punto de referencia llega en las unidades de cada objetivo; las
/// capacidades trabajan en espacio de maximización.
pub(crate) fn maximization_ref_point(spec: &ProcessSpec, ref_point: Option<&[f64]>) -> Result<Option<Vec<f64>>> {
    let Some(point) = ref_point else {
        return Ok(None);
    };
    if point.len() != spec.objectives.len() {
        return Err(EngineError::Validation(format!("ref_point tiene {} valores, el proceso tiene {} objetivos",
                                                   point.len(),
                                                   spec.objectives.len())));
    }
    if point.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::Validation("ref_point debe ser finito".into()));
    }
    Ok(Some(point.iter().zip(spec.objectives.iter()).map(|(v, o)| o.to_maximization(*v)).collect()))
}
