use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::executor::StrategyExecutor;
use boa_providers::CapabilityRegistry;
use campaign_store::{BlobStore, CampaignStateController, CampaignStore, JobQueue, Lease, LeaseLockCoordinator,
                     ModelCheckpointer, ProposalLedger, WriteLockCoordinator};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Componentes compartidos por la fachada, los handlers y los workers.
/// Todos apuntan al mismo almacén.
pub struct EngineContext {
    pub store: Arc<dyn CampaignStore>,
    pub registry: Arc<CapabilityRegistry>,
    pub locks: LeaseLockCoordinator<dyn CampaignStore>,
    pub queue: JobQueue<dyn CampaignStore>,
    pub ledger: ProposalLedger<dyn CampaignStore>,
    pub checkpointer: ModelCheckpointer<dyn CampaignStore>,
    pub states: CampaignStateController<dyn CampaignStore>,
    pub executor: StrategyExecutor,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(store: Arc<dyn CampaignStore>,
               blobs: Arc<dyn BlobStore>,
               registry: Arc<CapabilityRegistry>,
               config: EngineConfig)
               -> Self {
        EngineContext { locks: LeaseLockCoordinator::new(store.clone(), config.lease_ttl),
                        queue: JobQueue::new(store.clone()),
                        ledger: ProposalLedger::new(store.clone()),
                        checkpointer: ModelCheckpointer::new(store.clone(), blobs),
                        states: CampaignStateController::new(store.clone()),
                        executor: StrategyExecutor::new(registry.clone(), config.capability_deadline),
                        store,
                        registry,
                        config }
    }

    /// Ejecuta `f` con el lock de escritura de la campaña. Si no se consigue
    /// dentro de `lock_wait` devuelve `Locked`. El lock se libera siempre,
    /// también cuando `f` falla.
    pub async fn with_write_lock<T, F, Fut>(&self, campaign_id: Uuid, token: &str, f: F) -> Result<T>
        where F: FnOnce(Lease) -> Fut,
              Fut: Future<Output = Result<T>>
    {
        let lease = self.locks
                        .acquire(campaign_id, token, self.config.lock_wait)
                        .await?
                        .ok_or(EngineError::Locked { campaign_id })?;
        let outcome = f(lease).await;
        if let Err(e) = self.locks.release(campaign_id, token).await {
            log::warn!("no se pudo liberar el lock de la campaña {} ({}): {}", campaign_id, token, e);
        }
        outcome
    }
}
