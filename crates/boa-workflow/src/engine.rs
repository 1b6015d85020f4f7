// Fachada del motor de campañas.
//
// Es la superficie que usa el transporte (CLI, HTTP, ...): ciclo de vida,
// observaciones, `propose` asíncrono vía cola, decisiones y métricas. Las
// escrituras que afectan al conjunto de datos o al libro pasan por el lock
// de escritura de la campaña.
use crate::analyzer::{CampaignAnalyzer, CampaignMetrics};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::errors::{EngineError, Result};
use crate::handlers::propose::{maximization_ref_point, select_strategies};
use crate::handlers::{CampaignBundle, ExportJobHandler, JobDispatcher, ProposeJobHandler};
use crate::import::CampaignImporter;
use crate::worker::{Worker, WorkerPool, WorkerTiming};
use boa_providers::{CapabilityRegistry, FittedModel};
use campaign_domain::{AcceptedCandidates, Campaign, CampaignTransition, Checkpoint, CheckpointBundle, Counterfactual,
                      Decision, Iteration, Job, JobFilter, JobStatus, JobType, NewObservation, Observation,
                      PendingCandidate, ProcessSpec, Proposal, ProposeParams, StrategyConfig};
use campaign_store::{BlobStore, CampaignStore, Lease, WriteLockCoordinator};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Nombre de la estrategia usada cuando ni la campaña ni el proceso
/// definen ninguna.
pub const DEFAULT_STRATEGY: &str = "default";

pub struct CampaignEngine {
    ctx: Arc<EngineContext>,
    dispatcher: Arc<JobDispatcher>,
    analyzer: CampaignAnalyzer,
}

impl CampaignEngine {
    pub fn new(store: Arc<dyn CampaignStore>,
               blobs: Arc<dyn BlobStore>,
               registry: Arc<CapabilityRegistry>,
               config: EngineConfig)
               -> Result<Self> {
        config.validate()?;
        let ctx = Arc::new(EngineContext::new(store.clone(), blobs, registry.clone(), config));
        let dispatcher = JobDispatcher::new().with_handler(Arc::new(ProposeJobHandler::new(ctx.clone())))
                                             .with_handler(Arc::new(ExportJobHandler::new(ctx.clone())));
        Ok(Self { analyzer: CampaignAnalyzer::new(store, registry.dominance()),
                  dispatcher: Arc::new(dispatcher),
                  ctx })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    // ---- procesos ----

    /// Registra una definición de proceso. El encoder valida el espacio y
    /// las estrategias por defecto deben existir en el catálogo.
    pub fn register_process(&self, spec: ProcessSpec) -> Result<ProcessSpec> {
        spec.check_shape()?;
        let problems = self.ctx.registry.encoder().validate(&spec);
        if !problems.is_empty() {
            return Err(EngineError::Validation(problems.join("; ")));
        }
        for strategy in spec.strategies.values() {
            self.ctx.registry.check_strategy(strategy)?;
        }
        self.ctx.store.insert_process(&spec)?;
        log::info!("proceso registrado id={} nombre={}", spec.id, spec.name);
        Ok(spec)
    }

    pub fn get_process(&self, process_id: &Uuid) -> Result<ProcessSpec> {
        Ok(self.ctx.store.get_process(process_id)?)
    }

    pub fn list_processes(&self) -> Result<Vec<ProcessSpec>> {
        Ok(self.ctx.store.list_processes()?)
    }

    // ---- ciclo de vida ----

    /// Crea una campaña en estado Created. Sin estrategias explícitas
    /// hereda las del proceso y, si tampoco hay, usa `DEFAULT_STRATEGY`.
    pub fn create_campaign(&self,
                           process_id: Uuid,
                           name: &str,
                           description: Option<String>,
                           strategies: Option<IndexMap<String, StrategyConfig>>)
                           -> Result<Campaign> {
        let spec = self.ctx.store.get_process(&process_id)?;
        let strategies = match strategies {
            Some(s) if !s.is_empty() => s,
            _ if !spec.strategies.is_empty() => spec.strategies.clone(),
            _ => {
                let mut s = IndexMap::new();
                s.insert(DEFAULT_STRATEGY.to_string(), StrategyConfig::new("lhs", "idw", "ucb"));
                s
            }
        };
        for strategy in strategies.values() {
            self.ctx.registry.check_strategy(strategy)?;
        }
        let mut campaign = Campaign::new(process_id, name, strategies)?;
        if let Some(d) = description {
            campaign = campaign.with_description(d);
        }
        Ok(self.ctx.states.create(campaign)?)
    }

    pub fn get_campaign(&self, campaign_id: &Uuid) -> Result<Campaign> {
        Ok(self.ctx.states.get(campaign_id)?)
    }

    pub fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.ctx.states.list()?)
    }

    pub fn transition(&self, campaign_id: &Uuid, transition: CampaignTransition) -> Result<Campaign> {
        Ok(self.ctx.states.transition(campaign_id, transition)?)
    }

    pub fn start(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Start)
    }

    /// Detiene nuevas propuestas; los jobs ya encolados siguen su curso.
    pub fn pause(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Pause)
    }

    pub fn resume(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Resume)
    }

    pub fn complete(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Complete)
    }

    pub fn archive(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Archive)
    }

    // ---- observaciones ----

    /// Valida, codifica y añade las filas de forma atómica bajo el lock de
    /// escritura. O entran todas o ninguna.
    pub async fn add_observations(&self,
                                  campaign_id: Uuid,
                                  rows: Vec<NewObservation>,
                                  source: &str)
                                  -> Result<Vec<Observation>> {
        let campaign = self.ctx.states.require_active(&campaign_id)?;
        if rows.is_empty() {
            return Err(EngineError::Validation("no hay observaciones que añadir".into()));
        }
        let spec = self.ctx.store.get_process(&campaign.process_id)?;
        let encoder = self.ctx.registry.encoder();
        let mut observations = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            row.check_objectives(&spec)
               .map_err(|e| EngineError::Validation(format!("fila {}: {}", i, e)))?;
            let x = encoder.encode(&spec, &row.x_raw)
                           .map_err(|e| EngineError::Validation(format!("fila {}: {}", i, e)))?;
            observations.push(row.into_observation(campaign_id, x, source));
        }

        let token = format!("observations:{}", Uuid::new_v4());
        let ctx = self.ctx.clone();
        self.ctx
            .with_write_lock(campaign_id, &token, |lease: Lease| async move {
                // El estado puede haber cambiado mientras se esperaba el lock.
                ctx.states.require_active(&campaign_id)?;
                ctx.store.append_observations(&campaign_id, &observations, Some(&lease))?;
                log::info!("{} observaciones añadidas a la campaña {} (source={})",
                           observations.len(),
                           campaign_id,
                           source);
                Ok(observations)
            })
            .await
    }

    pub fn list_observations(&self, campaign_id: &Uuid) -> Result<Vec<Observation>> {
        self.ctx.states.get(campaign_id)?;
        Ok(self.ctx.store.list_observations(campaign_id)?)
    }

    // ---- jobs ----

    /// Valida la petición y encola un job `propose`. Devuelve el id del job;
    /// el resultado se consulta con `get_job`.
    pub fn propose(&self, campaign_id: Uuid, params: ProposeParams) -> Result<Uuid> {
        let campaign = self.ctx.states.require_active(&campaign_id)?;
        select_strategies(&campaign, params.strategy_names.as_deref())?;
        if params.batch_size == Some(0) {
            return Err(EngineError::Validation("batch_size debe ser al menos 1".into()));
        }
        let spec = self.ctx.store.get_process(&campaign.process_id)?;
        maximization_ref_point(&spec, params.ref_point.as_deref())?;
        let job_id = self.ctx.queue.enqueue(Some(campaign_id), JobType::Propose, serde_json::to_value(&params)?)?;
        log::info!("propose encolado job={} campaña={}", job_id, campaign_id);
        Ok(job_id)
    }

    /// Encola la exportación de la campaña. El paquete queda como resultado
    /// del job.
    pub fn export(&self, campaign_id: Uuid) -> Result<Uuid> {
        self.ctx.states.get(&campaign_id)?;
        Ok(self.ctx.queue.enqueue(Some(campaign_id), JobType::Export, serde_json::json!({}))?)
    }

    /// Paquete de exportación calculado en el momento, sin pasar por la cola.
    pub fn export_now(&self, campaign_id: &Uuid) -> Result<JsonValue> {
        ExportJobHandler::new(self.ctx.clone()).build_bundle(campaign_id)
    }

    /// Recrea una campaña exportada con ids nuevos. Acepta el paquete tal
    /// cual lo devuelve `export`.
    pub async fn import_bundle(&self, bundle: JsonValue) -> Result<Campaign> {
        let bundle: CampaignBundle =
            serde_json::from_value(bundle).map_err(|e| EngineError::Validation(format!("paquete de exportación ilegible: {}", e)))?;
        CampaignImporter::new(self.ctx.clone()).import(bundle).await
    }

    pub async fn import_from_file(&self, path: &Path) -> Result<Campaign> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::Validation(format!("{}: {}", path.display(), e)))?;
        let bundle: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Validation(format!("{}: no es JSON válido: {}", path.display(), e)))?;
        self.import_bundle(bundle).await
    }

    pub fn get_job(&self, job_id: &Uuid) -> Result<Job> {
        Ok(self.ctx.queue.get(job_id)?)
    }

    /// Sólo los jobs pendientes se cancelan; uno en ejecución devuelve
    /// `JobAlreadyRunning`.
    pub fn cancel_job(&self, job_id: &Uuid) -> Result<Job> {
        Ok(self.ctx.queue.cancel(job_id)?)
    }

    pub fn list_jobs(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<Vec<Job>> {
        Ok(self.ctx.queue.list(filter, limit, offset)?)
    }

    pub fn count_jobs(&self, status: Option<JobStatus>, campaign_id: Option<Uuid>) -> Result<usize> {
        Ok(self.ctx.queue.count(status, campaign_id)?)
    }

    /// Marca como fallidos los jobs en ejecución cuyo worker dejó de latir.
    pub fn recover_orphans(&self) -> Result<Vec<Job>> {
        Ok(self.ctx.queue.recover_orphans(self.ctx.config.job_stale_after)?)
    }

    pub fn cleanup_jobs(&self, keep_last: usize) -> Result<usize> {
        Ok(self.ctx.queue.cleanup_finished(keep_last)?)
    }

    /// Arranca un pool de `n` workers (0 usa el valor configurado).
    pub fn spawn_workers(&self, n: usize) -> Result<WorkerPool> {
        let n = if n == 0 { self.ctx.config.workers } else { n };
        WorkerPool::spawn(n,
                          self.ctx.queue.clone(),
                          self.dispatcher.clone(),
                          WorkerTiming::from_config(&self.ctx.config),
                          self.ctx.config.job_stale_after)
    }

    /// Procesa en línea todos los jobs pendientes. Útil sin pool de
    /// workers y en pruebas.
    pub async fn run_pending(&self) -> Result<Vec<Job>> {
        let worker = Worker::new(0,
                                 self.ctx.queue.clone(),
                                 self.dispatcher.clone(),
                                 WorkerTiming::from_config(&self.ctx.config));
        let mut done = Vec::new();
        while let Some(job) = worker.run_once().await? {
            done.push(job);
        }
        Ok(done)
    }

    // ---- libro de propuestas ----

    /// Registra la decisión de una iteración. No toma el lock: la unicidad
    /// de la decisión por iteración la garantiza el almacén.
    pub fn decide(&self, iteration_id: &Uuid, accepted: Vec<AcceptedCandidates>, notes: Option<String>) -> Result<Decision> {
        Ok(self.ctx.ledger.record_decision(iteration_id, accepted, notes)?)
    }

    pub fn get_counterfactuals(&self, iteration_id: &Uuid) -> Result<Vec<Counterfactual>> {
        Ok(self.ctx.ledger.get_counterfactuals(iteration_id)?)
    }

    /// Candidatos aceptados aún sin observación. La comparación se hace en
    /// el espacio codificado, así `50` y `50.0` son el mismo punto.
    pub fn pending_candidates(&self, campaign_id: &Uuid) -> Result<Vec<PendingCandidate>> {
        let campaign = self.ctx.states.get(campaign_id)?;
        let spec = self.ctx.store.get_process(&campaign.process_id)?;
        let encoder = self.ctx.registry.encoder();
        Ok(self.ctx.ledger.pending_candidates(campaign_id, |c| encoder.encode(&spec, c).ok())?)
    }

    pub fn list_iterations(&self, campaign_id: &Uuid) -> Result<Vec<Iteration>> {
        Ok(self.ctx.ledger.list_iterations(campaign_id)?)
    }

    pub fn get_iteration_by_index(&self, campaign_id: &Uuid, index: i64) -> Result<Iteration> {
        Ok(self.ctx.ledger.get_iteration_by_index(campaign_id, index)?)
    }

    pub fn list_proposals(&self, iteration_id: &Uuid) -> Result<Vec<Proposal>> {
        Ok(self.ctx.ledger.list_proposals(iteration_id)?)
    }

    pub fn get_decision(&self, iteration_id: &Uuid) -> Result<Option<Decision>> {
        Ok(self.ctx.ledger.get_decision(iteration_id)?)
    }

    // ---- métricas ----

    pub async fn metrics(&self, campaign_id: &Uuid, ref_point: Option<&[f64]>) -> Result<CampaignMetrics> {
        self.analyzer.metrics(campaign_id, ref_point).await
    }

    pub async fn pareto_front(&self, campaign_id: &Uuid) -> Result<Vec<Observation>> {
        self.analyzer.pareto_front(campaign_id).await
    }

    // ---- checkpoints y locks ----

    pub fn list_checkpoints(&self, campaign_id: &Uuid) -> Result<Vec<Checkpoint>> {
        Ok(self.ctx.checkpointer.list(campaign_id)?)
    }

    /// Checkpoint de la iteración pedida (o el último) ya decodificado.
    pub fn load_checkpoint(&self, campaign_id: &Uuid, iteration_id: Option<&Uuid>) -> Result<Option<(Checkpoint, CheckpointBundle)>> {
        let Some((checkpoint, bytes)) = self.ctx.checkpointer.load(campaign_id, iteration_id)? else {
            return Ok(None);
        };
        let bundle: CheckpointBundle =
            serde_json::from_slice(&bytes).map_err(|e| EngineError::CheckpointIo(format!("checkpoint {}: {}", checkpoint.id, e)))?;
        Ok(Some((checkpoint, bundle)))
    }

    /// Reconstruye el modelo ajustado de una estrategia a partir del último
    /// checkpoint (o el de `iteration_id`) sin reajustar con todo el
    /// histórico.
    pub fn restore_model(&self,
                         campaign_id: &Uuid,
                         strategy_name: &str,
                         iteration_id: Option<&Uuid>)
                         -> Result<Option<Arc<dyn FittedModel>>> {
        let Some((_, bundle)) = self.load_checkpoint(campaign_id, iteration_id)? else {
            return Ok(None);
        };
        let Some(blob) = bundle.model_for(strategy_name) else {
            return Ok(None);
        };
        let model = self.ctx.registry.model(&blob.model_name)?;
        Ok(Some(model.restore(&blob.data)?))
    }

    /// Lease vivo de la campaña, si lo hay.
    pub async fn is_locked(&self, campaign_id: Uuid) -> Result<Option<Lease>> {
        Ok(self.ctx.locks.is_locked(campaign_id).await?)
    }
}
