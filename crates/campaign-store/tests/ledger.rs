mod common;

use campaign_domain::{AcceptedCandidates, DomainError, NewObservation, NewProposal, RawCandidate};
use campaign_store::{ObservationRepository, ProposalLedger, StoreError};
use serde_json::json;
use std::collections::BTreeMap;

fn row(temp: f64) -> RawCandidate {
  json!({ "temp": temp, "cat": "a" }).as_object().cloned().unwrap()
}

fn proposal(name: &str, n: usize) -> NewProposal {
  NewProposal::new(name, (0..n).map(|i| row(20.0 + i as f64)).collect())
}

#[test]
fn iteration_indices_are_gapless_from_zero() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  for expected in 0..4 {
    let it = ledger.append_iteration(&campaign.id, "hash", json!({}), None).unwrap();
    assert_eq!(it.index, expected);
  }
  let indices: Vec<i64> = ledger.list_iterations(&campaign.id).unwrap().iter().map(|i| i.index).collect();
  assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn commit_iteration_stores_sibling_proposals() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  let (it, props) = ledger.commit_iteration(&campaign.id,
                                            "abc",
                                            json!({}),
                                            vec![proposal("default", 2), proposal("exploration", 3)],
                                            None)
                          .unwrap();
  assert_eq!(props.len(), 2);
  assert_eq!(ledger.list_proposals(&it.id).unwrap().len(), 2);
  assert_eq!(ledger.get_iteration(&it.id).unwrap().dataset_hash, "abc");

  let dup = ledger.add_proposal(&it.id, proposal("default", 1)).unwrap_err();
  assert!(matches!(dup, StoreError::Conflict(_)));
}

#[test]
fn mismatched_scores_are_rejected() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  let it = ledger.append_iteration(&campaign.id, "h", json!({}), None).unwrap();
  let mut p = proposal("default", 2);
  p.scores = Some(vec![1.0]);
  assert!(matches!(ledger.add_proposal(&it.id, p), Err(StoreError::Domain(DomainError::ValidationError(_)))));
}

#[test]
fn second_decision_is_duplicate() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  let (it, props) = ledger.commit_iteration(&campaign.id, "h", json!({}), vec![proposal("default", 3)], None).unwrap();
  let accepted = vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![0] }];
  ledger.record_decision(&it.id, accepted.clone(), Some("ok".into())).unwrap();
  let err = ledger.record_decision(&it.id, accepted, None).unwrap_err();
  assert!(matches!(err, StoreError::DuplicateDecision(id) if id == it.id));
}

#[test]
fn decision_validates_proposals_and_indices() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  let (it, props) = ledger.commit_iteration(&campaign.id, "h", json!({}), vec![proposal("default", 2)], None).unwrap();
  let out_of_range = vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![2] }];
  assert!(ledger.record_decision(&it.id, out_of_range, None).is_err());
  let foreign = vec![AcceptedCandidates { proposal_id: uuid::Uuid::new_v4(), candidate_indices: vec![0] }];
  assert!(ledger.record_decision(&it.id, foreign, None).is_err());
  // Los intentos inválidos no consumen la decisión.
  assert!(ledger.get_decision(&it.id).unwrap().is_none());
}

#[test]
fn counterfactuals_follow_the_decision() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store);
  let (it, props) = ledger.commit_iteration(&campaign.id,
                                            "h",
                                            json!({}),
                                            vec![proposal("default", 3), proposal("exploration", 2)],
                                            None)
                          .unwrap();

  let before = ledger.get_counterfactuals(&it.id).unwrap();
  assert_eq!(before[0].candidate_indices, vec![0, 1, 2]);
  assert_eq!(before[1].candidate_indices, vec![0, 1]);

  ledger.record_decision(&it.id,
                         vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![2, 0] }],
                         None)
        .unwrap();
  let after = ledger.get_counterfactuals(&it.id).unwrap();
  assert_eq!(after[0].candidate_indices, vec![1]);
  assert_eq!(after[1].candidate_indices, vec![0, 1]);
}

/// Codificación de juguete: temperatura normalizada y "cat" fijo.
fn encode(c: &RawCandidate) -> Option<Vec<f64>> {
  Some(vec![(c.get("temp")?.as_f64()? - 20.0) / 60.0, 1.0, 0.0])
}

#[test]
fn pending_candidates_drop_once_observed() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store.clone());
  let (it, props) = ledger.commit_iteration(&campaign.id, "h", json!({}), vec![proposal("default", 2)], None).unwrap();
  ledger.record_decision(&it.id,
                         vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![0, 1] }],
                         None)
        .unwrap();
  assert_eq!(ledger.pending_candidates(&campaign.id, encode).unwrap().len(), 2);

  let mut y = BTreeMap::new();
  y.insert("yield".to_string(), 0.5);
  let obs = NewObservation::new(row(20.0), y).into_observation(campaign.id, vec![0.0, 1.0, 0.0], "user");
  store.append_observations(&campaign.id, &[obs], None).unwrap();
  let pending = ledger.pending_candidates(&campaign.id, encode).unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].x_raw["temp"], 21.0);
}

#[test]
fn integer_and_float_inputs_are_the_same_candidate() {
  let (store, campaign) = common::store_with_campaign();
  let ledger = ProposalLedger::new(store.clone());
  let (it, props) = ledger.commit_iteration(&campaign.id, "h", json!({}), vec![proposal("default", 1)], None).unwrap();
  ledger.record_decision(&it.id,
                         vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![0] }],
                         None)
        .unwrap();

  // El candidato propuesto lleva 20.0; la observación llega con 20.
  let observed = json!({ "temp": 20, "cat": "a" }).as_object().cloned().unwrap();
  assert_ne!(observed, row(20.0));
  let mut y = BTreeMap::new();
  y.insert("yield".to_string(), 0.7);
  let x = encode(&observed).unwrap();
  let obs = NewObservation::new(observed, y).into_observation(campaign.id, x, "user");
  store.append_observations(&campaign.id, &[obs], None).unwrap();

  assert!(ledger.pending_candidates(&campaign.id, encode).unwrap().is_empty());
}
