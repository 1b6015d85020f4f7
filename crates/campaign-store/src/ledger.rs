// Archivo: ledger.rs
// Propósito: libro append-only de iteraciones, propuestas y decisiones.
// Los contrafactuales se derivan en cada lectura.
use crate::errors::{Result, StoreError};
use crate::lock::Lease;
use crate::repository::{LedgerRepository, ObservationRepository};
use campaign_domain::{AcceptedCandidates, Counterfactual, Decision, DomainError, Iteration, NewProposal,
                      PendingCandidate, Proposal, RawCandidate};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct ProposalLedger<R: LedgerRepository + ObservationRepository + ?Sized> {
    repo: Arc<R>,
}

impl<R: LedgerRepository + ObservationRepository + ?Sized> Clone for ProposalLedger<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

/// Tolerancia al comparar puntos codificados.
const SAME_POINT_EPS: f64 = 1e-9;

fn same_point(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= SAME_POINT_EPS)
}

fn invalid(msg: String) -> StoreError {
    StoreError::Domain(DomainError::ValidationError(msg))
}

/// Longitudes de scores/predicciones/codificados deben coincidir con el
/// número de candidatos.
fn check_proposal_shape(p: &NewProposal) -> Result<()> {
    let n = p.candidates.len();
    if p.strategy_name.trim().is_empty() {
        return Err(invalid("la propuesta necesita nombre de estrategia".into()));
    }
    if let Some(scores) = p.scores.as_ref() {
        if scores.len() != n {
            return Err(invalid(format!("{}: {} scores para {} candidatos", p.strategy_name, scores.len(), n)));
        }
    }
    if let Some(pred) = p.predictions.as_ref() {
        if pred.mean.len() != n || pred.std.len() != n {
            return Err(invalid(format!("{}: predicciones con longitud distinta a {} candidatos", p.strategy_name, n)));
        }
    }
    if let Some(enc) = p.candidates_encoded.as_ref() {
        if enc.len() != n {
            return Err(invalid(format!("{}: {} filas codificadas para {} candidatos", p.strategy_name, enc.len(), n)));
        }
    }
    Ok(())
}

impl<R: LedgerRepository + ObservationRepository + ?Sized> ProposalLedger<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Crea una iteración vacía con el siguiente índice. Debe llamarse con
    /// el lock de escritura tomado; `lease` se re-valida en el almacén.
    pub fn append_iteration(&self,
                            campaign_id: &Uuid,
                            dataset_hash: &str,
                            metadata: JsonValue,
                            lease: Option<&Lease>)
                            -> Result<Iteration> {
        let (iteration, _) = self.repo.append_iteration(campaign_id, dataset_hash, metadata, Vec::new(), lease)?;
        log::info!("iteración {} creada para la campaña {} (hash {})", iteration.index, campaign_id, dataset_hash);
        Ok(iteration)
    }

    pub fn add_proposal(&self, iteration_id: &Uuid, proposal: NewProposal) -> Result<Proposal> {
        check_proposal_shape(&proposal)?;
        let stored = self.repo.insert_proposal(iteration_id, proposal)?;
        log::info!("propuesta añadida estrategia={} iteración={} candidatos={}",
                   stored.strategy_name,
                   iteration_id,
                   stored.candidates.len());
        Ok(stored)
    }

    /// Iteración y propuestas hermanas en una sola transacción.
    pub fn commit_iteration(&self,
                            campaign_id: &Uuid,
                            dataset_hash: &str,
                            metadata: JsonValue,
                            proposals: Vec<NewProposal>,
                            lease: Option<&Lease>)
                            -> Result<(Iteration, Vec<Proposal>)> {
        for p in proposals.iter() {
            check_proposal_shape(p)?;
        }
        let (iteration, stored) = self.repo.append_iteration(campaign_id, dataset_hash, metadata, proposals, lease)?;
        log::info!("iteración {} confirmada para la campaña {} con {} propuestas",
                   iteration.index,
                   campaign_id,
                   stored.len());
        Ok((iteration, stored))
    }

    /// Registra qué candidatos se aceptaron. Los ids deben ser propuestas de
    /// la iteración y los índices estar en rango. Una segunda decisión para
    /// la misma iteración falla con `DuplicateDecision`.
    pub fn record_decision(&self,
                           iteration_id: &Uuid,
                           accepted: Vec<AcceptedCandidates>,
                           notes: Option<String>)
                           -> Result<Decision> {
        let proposals = self.repo.list_proposals(iteration_id)?;
        if proposals.is_empty() {
            // Distinguir iteración inexistente de iteración sin propuestas.
            self.repo.get_iteration(iteration_id)?;
        }
        let mut normalized = Vec::with_capacity(accepted.len());
        let mut seen_proposals = BTreeSet::new();
        for item in accepted {
            let proposal = proposals.iter()
                                    .find(|p| p.id == item.proposal_id)
                                    .ok_or_else(|| {
                                        invalid(format!("la propuesta {} no pertenece a la iteración {}",
                                                        item.proposal_id, iteration_id))
                                    })?;
            if !seen_proposals.insert(item.proposal_id) {
                return Err(invalid(format!("propuesta {} repetida en la decisión", item.proposal_id)));
            }
            let indices: BTreeSet<usize> = item.candidate_indices.iter().copied().collect();
            if let Some(bad) = indices.iter().find(|i| **i >= proposal.candidates.len()) {
                return Err(invalid(format!("índice {} fuera de rango para la propuesta {} ({} candidatos)",
                                           bad,
                                           proposal.id,
                                           proposal.candidates.len())));
            }
            normalized.push(AcceptedCandidates { proposal_id: item.proposal_id,
                                                 candidate_indices: indices.into_iter().collect() });
        }
        let decision = Decision::new(*iteration_id, normalized, notes);
        self.repo.insert_decision(&decision)?;
        log::info!("decisión registrada para la iteración {}", iteration_id);
        Ok(decision)
    }

    /// Candidatos no aceptados de cada propuesta de la iteración (todos si
    /// aún no hay decisión).
    pub fn get_counterfactuals(&self, iteration_id: &Uuid) -> Result<Vec<Counterfactual>> {
        self.repo.get_iteration(iteration_id)?;
        let decision = self.repo.get_decision(iteration_id)?;
        let proposals = self.repo.list_proposals(iteration_id)?;
        Ok(proposals.iter().map(|p| Counterfactual::derive(p, decision.as_ref())).collect())
    }

    /// Candidatos aceptados que todavía no tienen observación. La
    /// comparación se hace en el espacio codificado (`encode`), de modo que
    /// `5` y `5.0` son el mismo candidato; si `encode` no puede con un
    /// candidato se compara el JSON tal cual.
    pub fn pending_candidates<F>(&self, campaign_id: &Uuid, encode: F) -> Result<Vec<PendingCandidate>>
        where F: Fn(&RawCandidate) -> Option<Vec<f64>>
    {
        let observations = self.repo.list_observations(campaign_id)?;
        let mut pending = Vec::new();
        for iteration in self.repo.list_iterations(campaign_id)? {
            let decision = match self.repo.get_decision(&iteration.id)? {
                Some(d) => d,
                None => continue,
            };
            for accepted in decision.accepted.iter() {
                let proposal = self.repo.get_proposal(&accepted.proposal_id)?;
                for idx in accepted.candidate_indices.iter() {
                    let Some(candidate) = proposal.candidates.get(*idx) else { continue };
                    let observed = match encode(candidate) {
                        Some(x) => observations.iter().any(|o| same_point(&o.x_encoded, &x)),
                        None => observations.iter().any(|o| &o.x_raw == candidate),
                    };
                    if !observed {
                        pending.push(PendingCandidate { x_raw: candidate.clone(),
                                                        iteration_index: iteration.index,
                                                        strategy_name: proposal.strategy_name.clone() });
                    }
                }
            }
        }
        Ok(pending)
    }

    pub fn get_iteration(&self, iteration_id: &Uuid) -> Result<Iteration> {
        self.repo.get_iteration(iteration_id)
    }

    pub fn get_iteration_by_index(&self, campaign_id: &Uuid, index: i64) -> Result<Iteration> {
        self.repo.get_iteration_by_index(campaign_id, index)
    }

    pub fn list_iterations(&self, campaign_id: &Uuid) -> Result<Vec<Iteration>> {
        self.repo.list_iterations(campaign_id)
    }

    pub fn list_proposals(&self, iteration_id: &Uuid) -> Result<Vec<Proposal>> {
        self.repo.list_proposals(iteration_id)
    }

    pub fn get_decision(&self, iteration_id: &Uuid) -> Result<Option<Decision>> {
        self.repo.get_decision(iteration_id)
    }
}
