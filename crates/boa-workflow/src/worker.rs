// Bucle de workers.
//
// Cada worker toma jobs de la cola (dequeue atómico) a su nombre, los
// despacha por tipo y siempre deja el job en un estado terminal: el handler
// corre en su propia tarea, así que incluso un pánico termina en `Failed`.
// Mientras tanto el worker late; sólo los jobs sin latido son huérfanos.
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::handlers::JobDispatcher;
use campaign_domain::{Job, JobStatus};
use campaign_store::{CampaignStore, JobQueue};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Intervalos de un worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTiming {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl WorkerTiming {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self { poll_interval: config.worker_poll_interval, heartbeat_interval: config.job_heartbeat_interval }
    }
}

pub struct Worker {
    id: usize,
    /// Dueño de los jobs que toma este worker; único por instancia.
    owner: String,
    queue: JobQueue<dyn CampaignStore>,
    dispatcher: Arc<JobDispatcher>,
    timing: WorkerTiming,
}

impl Worker {
    pub fn new(id: usize, queue: JobQueue<dyn CampaignStore>, dispatcher: Arc<JobDispatcher>, timing: WorkerTiming) -> Self {
        Self { id, owner: format!("worker-{}-{}", id, Uuid::new_v4()), queue, dispatcher, timing }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Procesa un job si hay alguno pendiente. Devuelve el job ya cerrado.
    /// Mientras el handler corre, el worker late para que otros procesos
    /// no lo den por huérfano.
    pub async fn run_once(&self) -> crate::errors::Result<Option<Job>> {
        let Some(job) = self.queue.dequeue(&self.owner)? else {
            return Ok(None);
        };
        log::info!("worker {}: job {} ({}) en ejecución", self.id, job.id, job.job_type);

        let dispatcher = self.dispatcher.clone();
        let running = job.clone();
        let mut handle = tokio::spawn(async move { dispatcher.dispatch(&running).await });
        let mut beat = tokio::time::interval(self.timing.heartbeat_interval);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // El primer tick es inmediato y el dequeue ya fijó el latido.
        beat.tick().await;
        let outcome = loop {
            tokio::select! {
                res = &mut handle => break res,
                _ = beat.tick() => self.beat(&job),
            }
        };

        let (status, result, error) = match outcome {
            Ok(Ok(result)) => (JobStatus::Completed, Some(result), None),
            Ok(Err(e)) => (JobStatus::Failed, Some(failure_result(&e)), Some(e.to_string())),
            Err(join) => {
                let e = EngineError::JobCrashed { job_id: job.id };
                log::error!("worker {}: el handler del job {} terminó abruptamente: {}", self.id, job.id, join);
                (JobStatus::Failed, Some(failure_result(&e)), Some(format!("{}: {}", e, join)))
            }
        };
        if status == JobStatus::Failed {
            log::warn!("worker {}: job {} fallido: {}", self.id, job.id, error.as_deref().unwrap_or(""));
        }
        let closed = self.queue.finish(&job.id, &self.owner, status, result, error)?;
        log::info!("worker {}: job {} -> {}", self.id, closed.id, closed.status);
        Ok(Some(closed))
    }

    fn beat(&self, job: &Job) {
        match self.queue.heartbeat(&job.id, &self.owner) {
            Ok(true) => {}
            Ok(false) => log::warn!("worker {}: el job {} ya no es suyo", self.id, job.id),
            Err(e) => log::warn!("worker {}: latido del job {} fallido: {}", self.id, job.id, e),
        }
    }

    async fn run(self, stop: Arc<AtomicBool>, shutdown: Arc<Notify>) {
        log::debug!("worker {} arrancado", self.id);
        while !stop.load(Ordering::SeqCst) {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        _ = self.queue.wait_for_work(self.timing.poll_interval) => {}
                        _ = shutdown.notified() => {}
                    }
                }
                Err(e) => {
                    log::error!("worker {}: error de la cola: {}", self.id, e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.timing.poll_interval) => {}
                        _ = shutdown.notified() => {}
                    }
                }
            }
        }
        log::debug!("worker {} detenido", self.id);
    }
}

/// Resultado estructurado de un job fallido: el transporte decide con
/// `error_kind` y `retryable` sin interpretar el mensaje.
pub fn failure_result(e: &EngineError) -> serde_json::Value {
    let mut result = json!({ "error_kind": e.kind(), "retryable": e.is_retryable() });
    if let EngineError::AllStrategiesFailed { failures } = e {
        result["failed_strategies"] = json!(failures);
    }
    result
}

/// Pool acotado de workers sobre la misma cola.
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    queue: JobQueue<dyn CampaignStore>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Recupera los huérfanos (jobs Running sin latido durante
    /// `stale_after`) y después arranca `n` workers. Los jobs de otro pool
    /// vivo siguen latiendo y no se tocan.
    pub fn spawn(n: usize,
                 queue: JobQueue<dyn CampaignStore>,
                 dispatcher: Arc<JobDispatcher>,
                 timing: WorkerTiming,
                 stale_after: Duration)
                 -> crate::errors::Result<Self> {
        if n == 0 {
            return Err(EngineError::Validation("el pool necesita al menos un worker".into()));
        }
        let orphans = queue.recover_orphans(stale_after)?;
        if !orphans.is_empty() {
            log::warn!("{} jobs huérfanos marcados como fallidos", orphans.len());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());
        let handles = (0..n).map(|id| {
                                let worker = Worker::new(id, queue.clone(), dispatcher.clone(), timing);
                                tokio::spawn(worker.run(stop.clone(), shutdown.clone()))
                            })
                            .collect();
        log::info!("pool de {} workers en marcha", n);
        Ok(Self { stop, shutdown, queue, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Parada ordenada: cada worker termina el job que tiene en curso.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.queue.wake_all();
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("worker terminó con error: {}", e);
            }
        }
        log::info!("pool de workers detenido");
    }
}
