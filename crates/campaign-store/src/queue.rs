// Archivo: queue.rs
// Propósito: cola durable de jobs sobre un `JobRepository`.
//
// El dequeue atómico lo garantiza el repositorio; aquí se añade la señal de
// despertar para los workers del proceso y la política de huérfanos: cada
// job Running tiene un dueño que late, y sólo los que dejan de latir se
// dan por caídos.
use crate::errors::{Result, StoreError};
use crate::repository::JobRepository;
use campaign_domain::{Job, JobFilter, JobStatus, JobType};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Mensaje de error con el que se cierran los jobs huérfanos.
pub const ORPHAN_ERROR: &str = "worker crashed: job en ejecución sin latidos de su worker";

pub struct JobQueue<R: JobRepository + ?Sized> {
    repo: Arc<R>,
    wake: Arc<Notify>,
}

impl<R: JobRepository + ?Sized> Clone for JobQueue<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(), wake: self.wake.clone() }
    }
}

impl<R: JobRepository + ?Sized> JobQueue<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, wake: Arc::new(Notify::new()) }
    }

    /// Inserta un job Pending y despierta a un worker.
    pub fn enqueue(&self, campaign_id: Option<Uuid>, job_type: JobType, params: JsonValue) -> Result<Uuid> {
        let job = Job::new(campaign_id, job_type, params);
        self.repo.insert_job(&job)?;
        log::info!("job encolado id={} tipo={} campaign={:?}", job.id, job.job_type, campaign_id);
        self.wake.notify_one();
        Ok(job.id)
    }

    /// Toma el job Pending más antiguo y lo marca Running a nombre de
    /// `owner`.
    pub fn dequeue(&self, owner: &str) -> Result<Option<Job>> {
        let job = self.repo.dequeue_next(owner, Utc::now())?;
        if let Some(j) = job.as_ref() {
            log::debug!("job tomado id={} tipo={} worker={}", j.id, j.job_type, owner);
        }
        Ok(job)
    }

    /// Latido del dueño de un job Running. `false` si ya no le pertenece.
    pub fn heartbeat(&self, job_id: &Uuid, owner: &str) -> Result<bool> {
        self.repo.heartbeat_job(job_id, owner, None, Utc::now())
    }

    /// Avance en [0, 1] de un job Running; cuenta también como latido.
    pub fn update_progress(&self, job_id: &Uuid, owner: &str, progress: f64) -> Result<bool> {
        let alive = self.repo.heartbeat_job(job_id, owner, Some(progress), Utc::now())?;
        if alive {
            log::debug!("job {} avance {:.2}", job_id, progress);
        }
        Ok(alive)
    }

    /// Cierre del job por su dueño. Si entretanto se declaró huérfano, el
    /// estado guardado se respeta y se devuelve tal cual.
    pub fn finish(&self,
                  job_id: &Uuid,
                  owner: &str,
                  status: JobStatus,
                  result: Option<JsonValue>,
                  error: Option<String>)
                  -> Result<Job> {
        match self.repo.finish_job(job_id, owner, status, result, error, Utc::now())? {
            Some(job) => {
                log::info!("job {} -> {}", job.id, job.status);
                Ok(job)
            }
            None => {
                let current = self.repo.get_job(job_id)?;
                log::warn!("job {}: el worker {} ya no es su dueño, se conserva el estado {}",
                           job_id,
                           owner,
                           current.status);
                Ok(current)
            }
        }
    }

    /// Cierra o avanza un job sin comprobar el dueño. Las transiciones desde
    /// estados terminales se rechazan con `InvalidJobTransition`.
    pub fn update_status(&self,
                         job_id: &Uuid,
                         status: JobStatus,
                         result: Option<JsonValue>,
                         error: Option<String>)
                         -> Result<Job> {
        let job = self.repo.transition_job(job_id, status, result, error, Utc::now())?;
        log::info!("job {} -> {}", job.id, job.status);
        Ok(job)
    }

    /// Cancela un job Pending. Running falla con `JobAlreadyRunning`; un job
    /// ya terminado se devuelve tal cual.
    pub fn cancel(&self, job_id: &Uuid) -> Result<Job> {
        let job = self.repo.cancel_job(job_id, Utc::now())?;
        if job.status == JobStatus::Cancelled {
            log::info!("job cancelado id={}", job.id);
        }
        Ok(job)
    }

    pub fn get(&self, job_id: &Uuid) -> Result<Job> {
        self.repo.get_job(job_id)
    }

    pub fn list(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<Vec<Job>> {
        self.repo.list_jobs(filter, limit, offset)
    }

    pub fn count(&self, status: Option<JobStatus>, campaign_id: Option<Uuid>) -> Result<usize> {
        self.repo.count_jobs(status, campaign_id)
    }

    /// Marca como Failed (`job_crashed`) los jobs Running sin latido en
    /// los últimos `stale_after`. Los jobs de workers vivos no se tocan.
    pub fn recover_orphans(&self, stale_after: Duration) -> Result<Vec<Job>> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| StoreError::Other(format!("plazo de huérfanos inválido: {}", e)))?;
        let result = json!({ "error_kind": "job_crashed", "retryable": false });
        let orphans = self.repo.mark_orphans_failed(now - stale_after, ORPHAN_ERROR, result, now)?;
        for job in orphans.iter() {
            log::warn!("job huérfano marcado como fallido id={} campaign={:?}", job.id, job.campaign_id);
        }
        Ok(orphans)
    }

    pub fn cleanup_finished(&self, keep_last: usize) -> Result<usize> {
        let removed = self.repo.cleanup_finished(keep_last)?;
        if removed > 0 {
            log::info!("{} jobs terminados eliminados", removed);
        }
        Ok(removed)
    }

    /// Espera un aviso de `enqueue` o hasta `max_wait`. Devuelve `true` si
    /// hubo aviso.
    pub async fn wait_for_work(&self, max_wait: Duration) -> bool {
        tokio::time::timeout(max_wait, self.wake.notified()).await.is_ok()
    }

    /// Despierta a todos los workers en espera (p.ej. al apagar el pool).
    pub fn wake_all(&self) {
        self.wake.notify_waiters();
    }
}

