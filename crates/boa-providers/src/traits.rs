// traits.rs
//
// Interfaces de las capacidades. El motor sólo depende de estos traits;
// las implementaciones concretas se eligen por nombre en el registro.
use crate::errors::Result;
use async_trait::async_trait;
use campaign_domain::{Predictions, ProcessSpec, RawCandidate};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Genera candidatos que cubren el espacio (diseño inicial).
#[async_trait]
pub trait Sampler: Send + Sync {
  async fn sample(&self, spec: &ProcessSpec, n: usize, seed: u64, params: &JsonValue) -> Result<Vec<RawCandidate>>;
}

/// Ajusta un modelo sustituto sobre (X codificado, Y en espacio de
/// maximización). Y puede contener `NaN` para objetivos no observados.
#[async_trait]
pub trait SurrogateModel: Send + Sync {
  async fn fit(&self,
               x: &[Vec<f64>],
               y: &[Vec<f64>],
               spec: &ProcessSpec,
               params: &JsonValue)
               -> Result<Arc<dyn FittedModel>>;

  /// Reconstruye un modelo desde el blob producido por `to_blob`.
  fn restore(&self, blob: &[u8]) -> Result<Arc<dyn FittedModel>>;
}

/// Modelo ya ajustado. Para el orquestador es opaco salvo por su blob.
pub trait FittedModel: Send + Sync {
  fn model_name(&self) -> &str;
  fn predict(&self, x: &[Vec<f64>]) -> Result<Predictions>;
  fn to_blob(&self) -> Result<Vec<u8>>;
}

/// Datos de entrada de una adquisición.
pub struct AcquisitionRequest<'a> {
  pub model: &'a dyn FittedModel,
  pub spec: &'a ProcessSpec,
  pub dimension: usize,
  pub train_x: &'a [Vec<f64>],
  pub train_y: &'a [Vec<f64>],
  pub ref_point: Option<&'a [f64]>,
  pub batch_size: usize,
  pub seed: u64,
  pub params: &'a JsonValue,
}

/// Candidatos (codificados en el cubo unidad) con sus scores y, si la
/// adquisición las calcula, predicciones.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOutput {
  pub candidates: Vec<Vec<f64>>,
  pub scores: Vec<f64>,
  pub predictions: Option<Predictions>,
}

#[async_trait]
pub trait Acquisition: Send + Sync {
  async fn propose(&self, request: AcquisitionRequest<'_>) -> Result<AcquisitionOutput>;
}

/// Dominancia de Pareto e hipervolumen, siempre en espacio de maximización.
#[async_trait]
pub trait Dominance: Send + Sync {
  async fn pareto_front(&self, y: &[Vec<f64>]) -> Result<Vec<usize>>;
  async fn hypervolume(&self, y: &[Vec<f64>], ref_point: &[f64]) -> Result<f64>;
}

/// Codificación del espacio de entrada a vectores numéricos.
pub trait SpaceEncoder: Send + Sync {
  /// Lista de problemas del espacio; vacía si es válido.
  fn validate(&self, spec: &ProcessSpec) -> Vec<String>;
  fn dimension(&self, spec: &ProcessSpec) -> usize;
  fn encode(&self, spec: &ProcessSpec, raw: &RawCandidate) -> Result<Vec<f64>>;
  fn decode(&self, spec: &ProcessSpec, x: &[f64]) -> Result<RawCandidate>;
}
