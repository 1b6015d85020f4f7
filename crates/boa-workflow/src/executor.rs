// Ejecutor de estrategias.
//
// Secuencia las llamadas a las capacidades (sampler, o fit + adquisición)
// de una estrategia sobre una instantánea del dataset. No contiene
// matemáticas de optimización: valida los contratos de lo que devuelven,
// reintenta una vez los fallos transitorios y envuelve el resto en
// `StrategyExecutionFailed`.
use crate::errors::{EngineError, Result};
use boa_providers::{AcquisitionRequest, CapabilityRegistry, ProviderError, SpaceEncoder};
use campaign_domain::{DatasetSnapshot, ModelBlob, NewProposal, ProcessSpec, RawCandidate, StrategyConfig};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Tolerancia al comprobar que los candidatos estén en el cubo unidad.
const BOUNDS_EPS: f64 = 1e-9;

/// Trabajo de una estrategia dentro de una iteración. Es dueño de sus datos
/// para poder ejecutarse en su propia tarea.
#[derive(Debug, Clone)]
pub struct StrategyTask {
    pub strategy_name: String,
    pub config: StrategyConfig,
    pub spec: Arc<ProcessSpec>,
    pub snapshot: Arc<DatasetSnapshot>,
    pub batch_size: usize,
    /// Punto de referencia ya en espacio de maximización.
    pub ref_point: Option<Vec<f64>>,
    pub initial_design: bool,
    pub seed: u64,
}

/// Resultado de una estrategia: la propuesta a registrar y, si hubo ajuste,
/// el modelo serializado para el checkpoint.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub proposal: NewProposal,
    pub model: Option<ModelBlob>,
}

/// Semilla reproducible: explícita desplazada por la posición de la
/// estrategia, o derivada de `sha256(dataset_hash ‖ nombre)`.
pub fn strategy_seed(explicit: Option<u64>, position: usize, dataset_hash: &str, strategy_name: &str) -> u64 {
    match explicit {
        Some(seed) => seed.wrapping_add(position as u64),
        None => {
            let mut hasher = Sha256::new();
            hasher.update(dataset_hash.as_bytes());
            hasher.update(strategy_name.as_bytes());
            let digest = hasher.finalize();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            u64::from_le_bytes(bytes)
        }
    }
}

#[derive(Clone)]
pub struct StrategyExecutor {
    registry: Arc<CapabilityRegistry>,
    default_deadline: Duration,
}

impl StrategyExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, default_deadline: Duration) -> Self {
        Self { registry, default_deadline }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub async fn execute(&self, task: StrategyTask) -> Result<StrategyOutcome> {
        let name = task.strategy_name.clone();
        self.run(task).await.map_err(|cause| {
                               log::warn!("estrategia '{}' fallida: {}", name, cause);
                               EngineError::StrategyExecutionFailed { strategy_name: name.clone(), cause }
                           })
    }

    async fn run(&self, task: StrategyTask) -> std::result::Result<StrategyOutcome, String> {
        if task.batch_size == 0 {
            return Err("batch_size debe ser al menos 1".into());
        }
        let deadline = task.config.deadline_ms.map(Duration::from_millis).unwrap_or(self.default_deadline);
        let encoder = self.registry.encoder();
        if task.snapshot.is_empty() || task.initial_design {
            self.initial_design(&task, encoder.as_ref(), deadline).await
        } else {
            self.model_based(&task, encoder.as_ref(), deadline).await
        }
    }

    async fn initial_design(&self,
                            task: &StrategyTask,
                            encoder: &dyn SpaceEncoder,
                            deadline: Duration)
                            -> std::result::Result<StrategyOutcome, String> {
        let sampler = self.registry.sampler(&task.config.sampler).map_err(|e| e.to_string())?;
        let spec = task.spec.as_ref();
        let candidates = with_retry(&task.strategy_name, "sample", deadline, || {
                             sampler.sample(spec, task.batch_size, task.seed, &task.config.sampler_params)
                         }).await?;
        if candidates.len() != task.batch_size {
            return Err(format!("el sampler devolvió {} candidatos, se esperaban {}", candidates.len(), task.batch_size));
        }
        let encoded = candidates.iter()
                                .map(|c| encoder.encode(spec, c))
                                .collect::<std::result::Result<Vec<_>, ProviderError>>()
                                .map_err(|e| format!("candidato del sampler fuera del espacio: {}", e))?;
        let mut proposal = NewProposal::new(task.strategy_name.clone(), candidates);
        proposal.candidates_encoded = Some(encoded);
        proposal.metadata = json!({
            "mode": "initial_design",
            "sampler": task.config.sampler,
            "seed": task.seed,
            "dataset_hash": task.snapshot.hash,
        });
        log::info!("estrategia '{}': diseño inicial con {} candidatos", task.strategy_name, task.batch_size);
        Ok(StrategyOutcome { proposal, model: None })
    }

    async fn model_based(&self,
                         task: &StrategyTask,
                         encoder: &dyn SpaceEncoder,
                         deadline: Duration)
                         -> std::result::Result<StrategyOutcome, String> {
        let model = self.registry.model(&task.config.model).map_err(|e| e.to_string())?;
        let acquisition = self.registry.acquisition(&task.config.acquisition).map_err(|e| e.to_string())?;
        let spec = task.spec.as_ref();
        let dimension = encoder.dimension(spec);
        let train_x = &task.snapshot.x;
        let train_y = task.snapshot.y_maximization(spec);

        let fitted = with_retry(&task.strategy_name, "fit", deadline, || {
                         model.fit(train_x, &train_y, spec, &task.config.model_params)
                     }).await?;
        let output = with_retry(&task.strategy_name, "acquire", deadline, || {
                         acquisition.propose(AcquisitionRequest { model: fitted.as_ref(),
                                                                  spec,
                                                                  dimension,
                                                                  train_x,
                                                                  train_y: &train_y,
                                                                  ref_point: task.ref_point.as_deref(),
                                                                  batch_size: task.batch_size,
                                                                  seed: task.seed,
                                                                  params: &task.config.acquisition_params })
                     }).await?;

        check_output(&output.candidates, &output.scores, task.batch_size, dimension)?;
        if let Some(p) = output.predictions.as_ref() {
            if p.len() != output.candidates.len() || p.std.len() != output.candidates.len() {
                return Err(format!("predicciones para {} candidatos, se esperaban {}", p.len(), output.candidates.len()));
            }
        }
        let raw: Vec<RawCandidate> = output.candidates
                                           .iter()
                                           .map(|x| encoder.decode(spec, x))
                                           .collect::<std::result::Result<_, ProviderError>>()
                                           .map_err(|e| format!("no se pudo decodificar un candidato: {}", e))?;

        let model_blob = match fitted.to_blob() {
            Ok(data) => Some(ModelBlob { strategy_name: task.strategy_name.clone(),
                                         model_name: fitted.model_name().to_string(),
                                         data }),
            Err(e) => {
                log::warn!("estrategia '{}': el modelo no se pudo serializar: {}", task.strategy_name, e);
                None
            }
        };
        let mut proposal = NewProposal::new(task.strategy_name.clone(), raw);
        proposal.candidates_encoded = Some(output.candidates);
        proposal.scores = Some(output.scores);
        proposal.predictions = output.predictions;
        proposal.metadata = json!({
            "mode": "model_based",
            "model": task.config.model,
            "acquisition": task.config.acquisition,
            "seed": task.seed,
            "dataset_hash": task.snapshot.hash,
            "n_train": task.snapshot.len(),
        });
        log::info!("estrategia '{}': {} candidatos propuestos sobre {} observaciones",
                   task.strategy_name,
                   task.batch_size,
                   task.snapshot.len());
        Ok(StrategyOutcome { proposal, model: model_blob })
    }
}

/// Contrato de la adquisición: `batch_size` candidatos de la dimensión del
/// espacio, finitos y dentro del cubo unidad, con un score por candidato.
fn check_output(candidates: &[Vec<f64>], scores: &[f64], batch_size: usize, dimension: usize) -> std::result::Result<(), String> {
    if candidates.len() != batch_size {
        return Err(format!("la adquisición devolvió {} candidatos, se esperaban {}", candidates.len(), batch_size));
    }
    if scores.len() != candidates.len() {
        return Err(format!("{} scores para {} candidatos", scores.len(), candidates.len()));
    }
    for (i, x) in candidates.iter().enumerate() {
        if x.len() != dimension {
            return Err(format!("candidato {} con dimensión {}, se esperaba {}", i, x.len(), dimension));
        }
        if x.iter().any(|v| !v.is_finite() || *v < -BOUNDS_EPS || *v > 1.0 + BOUNDS_EPS) {
            return Err(format!("candidato {} fuera de los límites", i));
        }
    }
    Ok(())
}

/// Llama a una capacidad con plazo. Un fallo transitorio o un plazo
/// agotado se reintenta una sola vez.
async fn with_retry<T, F, Fut>(strategy: &str, step: &str, deadline: Duration, mut call: F) -> std::result::Result<T, String>
    where F: FnMut() -> Fut,
          Fut: Future<Output = boa_providers::Result<T>>
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let cause = match tokio::time::timeout(deadline, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_transient() => e.to_string(),
            Ok(Err(e)) => return Err(format!("{}: {}", step, e)),
            Err(_) => format!("plazo de {} ms agotado", deadline.as_millis()),
        };
        if attempt >= 2 {
            return Err(format!("{}: {}", step, cause));
        }
        log::warn!("estrategia '{}': reintentando {} tras fallo: {}", strategy, step, cause);
    }
}
