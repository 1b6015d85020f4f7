// Archivo: repository.rs
// Propósito: contratos de persistencia del motor de campañas. Cada trait
// cubre un agregado; `CampaignStore` los agrupa para las implementaciones
// concretas (memoria, Diesel). Las escrituras que mutan el historial de una
// campaña aceptan un `Lease` opcional que el almacén re-valida dentro de la
// misma transacción.
use crate::errors::Result;
use crate::lock::Lease;
use campaign_domain::{Campaign, CampaignStatus, Checkpoint, Decision, Iteration, Job, JobFilter, JobStatus, NewProposal,
                      Observation, ProcessSpec, Proposal};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub trait ProcessRepository: Send + Sync {
    fn insert_process(&self, spec: &ProcessSpec) -> Result<()>;

    fn get_process(&self, process_id: &Uuid) -> Result<ProcessSpec>;

    fn list_processes(&self) -> Result<Vec<ProcessSpec>>;
}

pub trait CampaignRepository: Send + Sync {
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()>;

    fn get_campaign(&self, campaign_id: &Uuid) -> Result<Campaign>;

    fn list_campaigns(&self) -> Result<Vec<Campaign>>;

    /// Compare-and-swap del estado: sólo actualiza si el estado actual es
    /// `expected`. Devuelve `None` si otro escritor se adelantó.
    fn update_campaign_status(&self,
                              campaign_id: &Uuid,
                              expected: CampaignStatus,
                              next: CampaignStatus,
                              now: DateTime<Utc>)
                              -> Result<Option<Campaign>>;
}

pub trait ObservationRepository: Send + Sync {
    /// Inserta todas las filas o ninguna.
    fn append_observations(&self, campaign_id: &Uuid, observations: &[Observation], fence: Option<&Lease>) -> Result<()>;

    /// Observaciones en orden de inserción.
    fn list_observations(&self, campaign_id: &Uuid) -> Result<Vec<Observation>>;

    fn count_observations(&self, campaign_id: &Uuid) -> Result<usize>;
}

pub trait LedgerRepository: Send + Sync {
    /// Crea la siguiente iteración (índice = último + 1, o 0) junto con sus
    /// propuestas en una sola transacción.
    fn append_iteration(&self,
                        campaign_id: &Uuid,
                        dataset_hash: &str,
                        metadata: JsonValue,
                        proposals: Vec<NewProposal>,
                        fence: Option<&Lease>)
                        -> Result<(Iteration, Vec<Proposal>)>;

    /// Añade una propuesta a una iteración existente. `Conflict` si la
    /// estrategia ya tiene propuesta en esa iteración.
    fn insert_proposal(&self, iteration_id: &Uuid, proposal: NewProposal) -> Result<Proposal>;

    fn get_iteration(&self, iteration_id: &Uuid) -> Result<Iteration>;

    fn get_iteration_by_index(&self, campaign_id: &Uuid, index: i64) -> Result<Iteration>;

    /// Iteraciones ordenadas por índice ascendente.
    fn list_iterations(&self, campaign_id: &Uuid) -> Result<Vec<Iteration>>;

    fn latest_iteration(&self, campaign_id: &Uuid) -> Result<Option<Iteration>>;

    fn get_proposal(&self, proposal_id: &Uuid) -> Result<Proposal>;

    /// Propuestas de la iteración en orden de inserción.
    fn list_proposals(&self, iteration_id: &Uuid) -> Result<Vec<Proposal>>;

    /// `DuplicateDecision` si la iteración ya tiene decisión.
    fn insert_decision(&self, decision: &Decision) -> Result<()>;

    fn get_decision(&self, iteration_id: &Uuid) -> Result<Option<Decision>>;
}

pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: &Job) -> Result<()>;

    fn get_job(&self, job_id: &Uuid) -> Result<Job>;

    /// Selecciona el job Pending más antiguo (created_at, id) y lo pasa a
    /// Running a nombre de `owner`, con `started_at = heartbeat_at = now`,
    /// de forma atómica. Dos llamadas concurrentes nunca devuelven el mismo
    /// job.
    fn dequeue_next(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Latido (y avance opcional) de un job Running. `false` si `owner` ya
    /// no es su dueño o el job dejó de estar Running.
    fn heartbeat_job(&self, job_id: &Uuid, owner: &str, progress: Option<f64>, now: DateTime<Utc>) -> Result<bool>;

    /// Cierre de un job por su dueño. `None` si el job ya no es de `owner`
    /// (p.ej. se declaró huérfano); en ese caso no se modifica.
    fn finish_job(&self,
                  job_id: &Uuid,
                  owner: &str,
                  next: JobStatus,
                  result: Option<JsonValue>,
                  error: Option<String>,
                  now: DateTime<Utc>)
                  -> Result<Option<Job>>;

    /// Transición monótona; falla con `InvalidJobTransition` si no es legal.
    fn transition_job(&self,
                      job_id: &Uuid,
                      next: JobStatus,
                      result: Option<JsonValue>,
                      error: Option<String>,
                      now: DateTime<Utc>)
                      -> Result<Job>;

    /// Pending -> Cancelled. Running falla con `JobAlreadyRunning`; un job
    /// terminal se devuelve sin cambios.
    fn cancel_job(&self, job_id: &Uuid, now: DateTime<Utc>) -> Result<Job>;

    /// Más recientes primero.
    fn list_jobs(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<Vec<Job>>;

    fn count_jobs(&self, status: Option<JobStatus>, campaign_id: Option<Uuid>) -> Result<usize>;

    /// Marca como Failed los jobs Running cuyo último latido es anterior a
    /// `stale_before` y los devuelve.
    fn mark_orphans_failed(&self,
                           stale_before: DateTime<Utc>,
                           error: &str,
                           result: JsonValue,
                           now: DateTime<Utc>)
                           -> Result<Vec<Job>>;

    /// Borra los jobs terminales más antiguos dejando `keep_last`.
    fn cleanup_finished(&self, keep_last: usize) -> Result<usize>;
}

pub trait CheckpointRepository: Send + Sync {
    fn insert_checkpoint(&self, checkpoint: &Checkpoint, fence: Option<&Lease>) -> Result<()>;

    /// Más recientes primero.
    fn list_checkpoints(&self, campaign_id: &Uuid) -> Result<Vec<Checkpoint>>;

    fn latest_checkpoint(&self, campaign_id: &Uuid) -> Result<Option<Checkpoint>>;

    fn checkpoint_for_iteration(&self, campaign_id: &Uuid, iteration_id: &Uuid) -> Result<Option<Checkpoint>>;

    fn delete_checkpoint(&self, checkpoint_id: &Uuid) -> Result<()>;
}

/// Leases de escritura por campaña. El almacén es la única fuente de verdad
/// para que las escrituras con fence se comprueben en la misma transacción.
pub trait LockRepository: Send + Sync {
    /// Toma el lease si está libre o expirado; si `token` ya es el holder
    /// vigente lo renueva. `None` si otro holder lo tiene.
    fn try_acquire_lease(&self, campaign_id: &Uuid, token: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Option<Lease>>;

    /// Devuelve `true` si se liberó; `false` si el token no coincide o no
    /// había lease.
    fn release_lease(&self, campaign_id: &Uuid, token: &str) -> Result<bool>;

    /// Lease guardado, vigente o no.
    fn get_lease(&self, campaign_id: &Uuid) -> Result<Option<Lease>>;
}

/// Almacén opaco de blobs (checkpoints de modelos).
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Agregado de todos los repositorios que necesita el motor.
pub trait CampaignStore:
    ProcessRepository + CampaignRepository + ObservationRepository + LedgerRepository + JobRepository + CheckpointRepository
    + LockRepository {
}

impl<T> CampaignStore for T where T: ProcessRepository
                                    + CampaignRepository
                                    + ObservationRepository
                                    + LedgerRepository
                                    + JobRepository
                                    + CheckpointRepository
                                    + LockRepository
{
}
