// observation.rs
use crate::{DomainError, ProcessSpec, RawCandidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Resultado experimental registrado en una campaña. Inmutable una vez
/// confirmado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub id: Uuid,
  pub campaign_id: Uuid,
  pub x_raw: RawCandidate,
  pub x_encoded: Vec<f64>,
  pub y: BTreeMap<String, f64>,
  pub source: String,
  pub observed_at: DateTime<Utc>,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

/// Fila de entrada para `add_observations` (antes de codificar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
  pub x_raw: RawCandidate,
  pub y: BTreeMap<String, f64>,
  #[serde(default)]
  pub observed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub metadata: Option<serde_json::Value>,
}

impl NewObservation {
  pub fn new(x_raw: RawCandidate, y: BTreeMap<String, f64>) -> Self {
    Self { x_raw, y, observed_at: None, metadata: None }
  }

  /// Comprueba que las claves de `y` sean objetivos del proceso y que los
  /// valores presentes sean finitos. Objetivos ausentes se admiten.
  pub fn check_objectives(&self, spec: &ProcessSpec) -> Result<(), DomainError> {
    for (name, value) in self.y.iter() {
      if !spec.objectives.iter().any(|o| &o.name == name) {
        return Err(DomainError::ValidationError(format!("Objetivo desconocido: {}", name)));
      }
      if !value.is_finite() {
        return Err(DomainError::ValidationError(format!("Valor no finito para el objetivo {}", name)));
      }
    }
    Ok(())
  }

  pub fn into_observation(self, campaign_id: Uuid, x_encoded: Vec<f64>, source: &str) -> Observation {
    let now = Utc::now();
    Observation { id: Uuid::new_v4(),
                  campaign_id,
                  x_raw: self.x_raw,
                  x_encoded,
                  y: self.y,
                  source: source.to_string(),
                  observed_at: self.observed_at.unwrap_or(now),
                  metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
                  created_at: now }
  }
}

/// Instantánea de solo lectura del conjunto de observaciones codificado,
/// tomada bajo el lock de escritura. `y` está ordenado según los objetivos
/// del proceso; los objetivos ausentes son `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSnapshot {
  pub x: Vec<Vec<f64>>,
  pub y: Vec<Vec<f64>>,
  pub hash: String,
}

impl DatasetSnapshot {
  pub fn from_observations(spec: &ProcessSpec, observations: &[Observation]) -> Self {
    let x: Vec<Vec<f64>> = observations.iter().map(|o| o.x_encoded.clone()).collect();
    let y: Vec<Vec<f64>> = observations.iter()
                                       .map(|o| {
                                         spec.objectives
                                             .iter()
                                             .map(|obj| o.y.get(&obj.name).copied().unwrap_or(f64::NAN))
                                             .collect()
                                       })
                                       .collect();
    let hash = Self::fingerprint(&x, &y);
    Self { x, y, hash }
  }

  pub fn len(&self) -> usize {
    self.x.len()
  }

  pub fn is_empty(&self) -> bool {
    self.x.is_empty()
  }

  /// Huella sha256 (16 hex) de X e Y. Usa la representación en bits de
  /// cada `f64` para que `NaN` y `-0.0` sean estables.
  pub fn fingerprint(x: &[Vec<f64>], y: &[Vec<f64>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((x.len() as u64).to_le_bytes());
    for (xs, ys) in x.iter().zip(y.iter()) {
      hasher.update((xs.len() as u64).to_le_bytes());
      for v in xs {
        hasher.update(v.to_bits().to_le_bytes());
      }
      hasher.update((ys.len() as u64).to_le_bytes());
      for v in ys {
        hasher.update(v.to_bits().to_le_bytes());
      }
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
  }

  /// Y transformado al espacio de maximización.
  pub fn y_maximization(&self, spec: &ProcessSpec) -> Vec<Vec<f64>> {
    self.y
        .iter()
        .map(|row| row.iter().zip(spec.objectives.iter()).map(|(v, obj)| obj.to_maximization(*v)).collect())
        .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fingerprint_depends_on_data() {
    let a = DatasetSnapshot::fingerprint(&[vec![0.1, 0.2]], &[vec![1.0]]);
    let b = DatasetSnapshot::fingerprint(&[vec![0.1, 0.2]], &[vec![1.5]]);
    let c = DatasetSnapshot::fingerprint(&[vec![0.1, 0.2]], &[vec![1.0]]);
    assert_ne!(a, b);
    assert_eq!(a, c);
    assert_eq!(a.len(), 16);
  }

  #[test]
  fn empty_dataset_has_stable_fingerprint() {
    assert_eq!(DatasetSnapshot::fingerprint(&[], &[]), DatasetSnapshot::fingerprint(&[], &[]));
  }
}
