// ledger.rs
use crate::RawCandidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Ronda de generación de propuestas. `index` es secuencial por campaña,
/// sin huecos y nunca reutilizado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
  pub id: Uuid,
  pub campaign_id: Uuid,
  pub index: i64,
  pub dataset_hash: String,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

/// Predicciones del modelo para cada candidato (una fila por candidato, una
/// columna por objetivo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
  pub mean: Vec<Vec<f64>>,
  pub std: Vec<Vec<f64>>,
}

impl Predictions {
  pub fn len(&self) -> usize {
    self.mean.len()
  }

  pub fn is_empty(&self) -> bool {
    self.mean.is_empty()
  }
}

/// Lote de candidatos de una estrategia para una iteración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
  pub id: Uuid,
  pub iteration_id: Uuid,
  pub strategy_name: String,
  pub candidates: Vec<RawCandidate>,
  pub candidates_encoded: Option<Vec<Vec<f64>>>,
  pub scores: Option<Vec<f64>>,
  pub predictions: Option<Predictions>,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

/// Datos de una propuesta antes de asignarle iteración e id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProposal {
  pub strategy_name: String,
  pub candidates: Vec<RawCandidate>,
  pub candidates_encoded: Option<Vec<Vec<f64>>>,
  pub scores: Option<Vec<f64>>,
  pub predictions: Option<Predictions>,
  pub metadata: serde_json::Value,
}

impl NewProposal {
  pub fn new(strategy_name: impl Into<String>, candidates: Vec<RawCandidate>) -> Self {
    Self { strategy_name: strategy_name.into(),
           candidates,
           candidates_encoded: None,
           scores: None,
           predictions: None,
           metadata: serde_json::json!({}) }
  }

  pub fn into_proposal(self, iteration_id: Uuid) -> Proposal {
    Proposal { id: Uuid::new_v4(),
               iteration_id,
               strategy_name: self.strategy_name,
               candidates: self.candidates,
               candidates_encoded: self.candidates_encoded,
               scores: self.scores,
               predictions: self.predictions,
               metadata: self.metadata,
               created_at: Utc::now() }
  }
}

/// Candidatos aceptados de una propuesta concreta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedCandidates {
  pub proposal_id: Uuid,
  pub candidate_indices: Vec<usize>,
}

/// Registro de qué candidatos se ejecutaron. Como mucho uno por iteración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
  pub id: Uuid,
  pub iteration_id: Uuid,
  pub accepted: Vec<AcceptedCandidates>,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl Decision {
  pub fn new(iteration_id: Uuid, accepted: Vec<AcceptedCandidates>, notes: Option<String>) -> Self {
    Self { id: Uuid::new_v4(), iteration_id, accepted, notes, created_at: Utc::now() }
  }

  /// Índices aceptados para `proposal_id` (vacío si la propuesta no aparece).
  pub fn accepted_for(&self, proposal_id: &Uuid) -> BTreeSet<usize> {
    self.accepted
        .iter()
        .filter(|a| &a.proposal_id == proposal_id)
        .flat_map(|a| a.candidate_indices.iter().copied())
        .collect()
  }
}

/// Candidatos propuestos y no aceptados de una propuesta. Se derivan en
/// cada lectura, nunca se almacenan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterfactual {
  pub proposal_id: Uuid,
  pub strategy_name: String,
  pub candidate_indices: Vec<usize>,
  pub candidates: Vec<RawCandidate>,
}

impl Counterfactual {
  /// Complemento de los índices aceptados (todos si no hay decisión).
  pub fn derive(proposal: &Proposal, decision: Option<&Decision>) -> Self {
    let accepted = decision.map(|d| d.accepted_for(&proposal.id)).unwrap_or_default();
    let candidate_indices: Vec<usize> = (0..proposal.candidates.len()).filter(|i| !accepted.contains(i)).collect();
    let candidates = candidate_indices.iter().map(|i| proposal.candidates[*i].clone()).collect();
    Self { proposal_id: proposal.id, strategy_name: proposal.strategy_name.clone(), candidate_indices, candidates }
  }
}

/// Candidato aceptado que todavía no tiene observación asociada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCandidate {
  pub x_raw: RawCandidate,
  pub iteration_index: i64,
  pub strategy_name: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn proposal_with(n: usize) -> Proposal {
    let candidates = (0..n).map(|i| json!({ "x": i }).as_object().cloned().unwrap()).collect();
    NewProposal::new("default", candidates).into_proposal(Uuid::new_v4())
  }

  #[test]
  fn counterfactual_without_decision_is_everything() {
    let p = proposal_with(3);
    let cf = Counterfactual::derive(&p, None);
    assert_eq!(cf.candidate_indices, vec![0, 1, 2]);
  }

  #[test]
  fn counterfactual_is_complement_of_accepted() {
    let p = proposal_with(4);
    let d = Decision::new(p.iteration_id,
                          vec![AcceptedCandidates { proposal_id: p.id, candidate_indices: vec![1, 3] }],
                          None);
    let cf = Counterfactual::derive(&p, Some(&d));
    assert_eq!(cf.candidate_indices, vec![0, 2]);
    assert_eq!(cf.candidates[1]["x"], 2);
  }
}
