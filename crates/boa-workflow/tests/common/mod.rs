#![allow(dead_code)]
use async_trait::async_trait;
use boa_providers::builtin::{IdwSurrogate, LatinHypercubeSampler};
use boa_providers::{Acquisition, AcquisitionOutput, AcquisitionRequest, CapabilityRegistry, FittedModel, ProviderError,
                    Sampler, SurrogateModel};
use boa_workflow::{CampaignEngine, EngineConfig};
use campaign_domain::{Campaign, InputVariable, Job, JobStatus, NewObservation, Objective, ProcessSpec, RawCandidate,
                      StrategyConfig};
use campaign_store::{InMemoryBlobStore, InMemoryCampaignStore};
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Adquisición que siempre falla sin posibilidad de reintento.
pub struct FailingAcquisition;

#[async_trait]
impl Acquisition for FailingAcquisition {
  async fn propose(&self, _request: AcquisitionRequest<'_>) -> boa_providers::Result<AcquisitionOutput> {
    Err(ProviderError::Failed("la optimización del criterio no converge".into()))
  }
}

/// Falla la primera llamada con un error transitorio y después delega en
/// el hipercubo latino.
#[derive(Default)]
pub struct FlakySampler {
  pub calls: AtomicUsize,
}

#[async_trait]
impl Sampler for FlakySampler {
  async fn sample(&self, spec: &ProcessSpec, n: usize, seed: u64, params: &JsonValue) -> boa_providers::Result<Vec<RawCandidate>> {
    if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
      return Err(ProviderError::Transient("servicio de muestreo no disponible".into()));
    }
    LatinHypercubeSampler.sample(spec, n, seed, params).await
  }
}

/// Modelo que tarda más que cualquier plazo razonable de prueba.
pub struct SlowModel {
  pub delay: Duration,
}

#[async_trait]
impl SurrogateModel for SlowModel {
  async fn fit(&self,
               x: &[Vec<f64>],
               y: &[Vec<f64>],
               spec: &ProcessSpec,
               params: &JsonValue)
               -> boa_providers::Result<Arc<dyn FittedModel>> {
    tokio::time::sleep(self.delay).await;
    IdwSurrogate.fit(x, y, spec, params).await
  }

  fn restore(&self, blob: &[u8]) -> boa_providers::Result<Arc<dyn FittedModel>> {
    IdwSurrogate.restore(blob)
  }
}

pub struct Doubles {
  pub registry: CapabilityRegistry,
  pub flaky: Arc<FlakySampler>,
}

/// Catálogo con las capacidades de referencia más los dobles de prueba:
/// sampler `flaky`, modelo `slow` y adquisición `failing`.
pub fn registry_with_doubles() -> Doubles {
  let mut registry = CapabilityRegistry::with_builtins();
  let flaky = Arc::new(FlakySampler::default());
  registry.register_sampler("flaky", flaky.clone());
  registry.register_model("slow", Arc::new(SlowModel { delay: Duration::from_millis(500) }));
  registry.register_acquisition("failing", Arc::new(FailingAcquisition));
  Doubles { registry, flaky }
}

pub fn test_config() -> EngineConfig {
  EngineConfig { worker_poll_interval: Duration::from_millis(20),
                 lock_wait: Duration::from_millis(100),
                 lease_ttl: Duration::from_secs(30),
                 capability_deadline: Duration::from_secs(5),
                 checkpoint_keep_last: 2,
                 job_heartbeat_interval: Duration::from_millis(50),
                 job_stale_after: Duration::from_secs(2),
                 ..EngineConfig::default() }
}

pub fn engine(registry: CapabilityRegistry) -> (CampaignEngine, Arc<InMemoryCampaignStore>, Arc<InMemoryBlobStore>) {
  let store = Arc::new(InMemoryCampaignStore::new());
  let blobs = Arc::new(InMemoryBlobStore::new());
  let engine = CampaignEngine::new(store.clone(), blobs.clone(), Arc::new(registry), test_config()).unwrap();
  (engine, store, blobs)
}

pub fn process() -> ProcessSpec {
  ProcessSpec::new("reactor",
                   vec![InputVariable::continuous("temp", 20.0, 80.0), InputVariable::categorical("cat", ["a", "b"])],
                   vec![Objective::maximize("yield"), Objective::minimize("cost")]).unwrap()
}

pub fn strategies(items: &[(&str, StrategyConfig)]) -> IndexMap<String, StrategyConfig> {
  items.iter().map(|(n, c)| (n.to_string(), c.clone())).collect()
}

/// Proceso registrado y campaña ya activa.
pub fn active_campaign(engine: &CampaignEngine, strategies: Option<IndexMap<String, StrategyConfig>>) -> Campaign {
  let spec = engine.register_process(process()).unwrap();
  let campaign = engine.create_campaign(spec.id, "lote-1", None, strategies).unwrap();
  engine.start(&campaign.id).unwrap()
}

pub fn row(temp: f64, cat: &str, yield_: f64, cost: f64) -> NewObservation {
  let y: BTreeMap<String, f64> = [("yield".to_string(), yield_), ("cost".to_string(), cost)].into_iter().collect();
  NewObservation::new(json!({ "temp": temp, "cat": cat }).as_object().cloned().unwrap(), y)
}

pub fn seed_rows() -> Vec<NewObservation> {
  vec![row(25.0, "a", 0.31, 12.0), row(50.0, "b", 0.55, 18.0), row(75.0, "a", 0.42, 9.5)]
}

/// Espera a que el job llegue a un estado terminal.
pub async fn wait_terminal(engine: &CampaignEngine, job_id: &Uuid) -> Job {
  for _ in 0..200 {
    let job = engine.get_job(job_id).unwrap();
    if job.status.is_terminal() {
      return job;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("el job {} no terminó", job_id);
}

pub fn assert_status(job: &Job, status: JobStatus) {
  assert_eq!(job.status, status, "job {:?}", job);
}
