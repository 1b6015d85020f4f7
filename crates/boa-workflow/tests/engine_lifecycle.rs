mod common;

use boa_workflow::{EngineError, DEFAULT_STRATEGY};
use campaign_domain::{AcceptedCandidates, CampaignStatus, JobStatus, ProposeParams};
use common::{active_campaign, assert_status, engine, registry_with_doubles, row, seed_rows};

fn batch(n: usize) -> ProposeParams {
  ProposeParams { batch_size: Some(n), ..ProposeParams::default() }
}

#[tokio::test]
async fn full_campaign_lifecycle() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  assert_eq!(campaign.status, CampaignStatus::Active);
  assert!(campaign.strategies.contains_key(DEFAULT_STRATEGY));

  // Sin datos: diseño inicial, sin checkpoint.
  let job_id = engine.propose(campaign.id, batch(3)).unwrap();
  let done = engine.run_pending().await.unwrap();
  assert_eq!(done.len(), 1);
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Completed);
  let result = job.result.unwrap();
  assert_eq!(result["iteration_index"], 0);
  assert_eq!(result["outcome"], "complete");
  assert!(result["checkpoint_id"].is_null());
  let first = engine.get_iteration_by_index(&campaign.id, 0).unwrap();
  let proposals = engine.list_proposals(&first.id).unwrap();
  assert_eq!(proposals.len(), 1);
  assert_eq!(proposals[0].candidates.len(), 3);
  assert_eq!(proposals[0].metadata["mode"], "initial_design");

  // Con datos: modelo + adquisición y checkpoint del modelo ajustado.
  let added = engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  assert_eq!(added.len(), 3);
  engine.propose(campaign.id, batch(3)).unwrap();
  engine.run_pending().await.unwrap();
  let second = engine.get_iteration_by_index(&campaign.id, 1).unwrap();
  assert_ne!(second.dataset_hash, first.dataset_hash);
  let proposal = &engine.list_proposals(&second.id).unwrap()[0];
  assert_eq!(proposal.metadata["mode"], "model_based");
  assert_eq!(proposal.scores.as_ref().map(|s| s.len()), Some(3));
  let (checkpoint, bundle) = engine.load_checkpoint(&campaign.id, None).unwrap().unwrap();
  assert_eq!(checkpoint.iteration_id, second.id);
  assert!(bundle.model_for(DEFAULT_STRATEGY).is_some());
  let model = engine.restore_model(&campaign.id, DEFAULT_STRATEGY, None).unwrap().unwrap();
  let predictions = model.predict(&proposal.candidates_encoded.clone().unwrap()).unwrap();
  assert_eq!(predictions.len(), 3);

  // Decisión y contrafactuales.
  let decision = engine.decide(&second.id,
                               vec![AcceptedCandidates { proposal_id: proposal.id, candidate_indices: vec![0] }],
                               Some("se ejecuta el primero".into()))
                       .unwrap();
  assert_eq!(decision.iteration_id, second.id);
  let counterfactuals = engine.get_counterfactuals(&second.id).unwrap();
  assert_eq!(counterfactuals[0].candidate_indices, vec![1, 2]);
  let again = engine.decide(&second.id, Vec::new(), None).unwrap_err();
  assert!(matches!(again, EngineError::DuplicateDecision { .. }));
  assert_eq!(engine.pending_candidates(&campaign.id).unwrap().len(), 1);

  // Más datos: otra iteración con otra huella.
  engine.add_observations(campaign.id, vec![row(40.0, "b", 0.61, 15.0), row(60.0, "a", 0.48, 8.0)], "user")
        .await
        .unwrap();
  engine.propose(campaign.id, batch(2)).unwrap();
  engine.run_pending().await.unwrap();
  let third = engine.get_iteration_by_index(&campaign.id, 2).unwrap();
  assert_ne!(third.dataset_hash, second.dataset_hash);

  let metrics = engine.metrics(&campaign.id, None).await.unwrap();
  assert_eq!(metrics.n_observations, 5);
  assert_eq!(metrics.n_iterations, 3);
  assert_eq!(metrics.best_values["yield"], 0.61);
  assert_eq!(metrics.best_values["cost"], 8.0);
  assert!(metrics.hypervolume.unwrap() > 0.0);
  assert!(!metrics.pareto_observation_ids.is_empty());
  let seen: Vec<usize> = metrics.convergence.iter().map(|c| c.n_observations).collect();
  assert_eq!(seen, vec![0, 3, 5]);
  assert!(metrics.convergence[0].hypervolume.is_none());

  let front = engine.pareto_front(&campaign.id).await.unwrap();
  assert_eq!(front.len(), metrics.pareto_observation_ids.len());

  // Ciclo de vida.
  engine.pause(&campaign.id).unwrap();
  let err = engine.propose(campaign.id, batch(1)).unwrap_err();
  assert!(matches!(err, EngineError::CampaignNotActive { status: CampaignStatus::Paused, .. }));
  let err = engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap_err();
  assert!(matches!(err, EngineError::CampaignNotActive { .. }));
  engine.resume(&campaign.id).unwrap();
  engine.complete(&campaign.id).unwrap();
  engine.archive(&campaign.id).unwrap();
  let err = engine.start(&campaign.id).unwrap_err();
  assert!(matches!(err,
                   EngineError::InvalidStateTransition { from: CampaignStatus::Archived, to: CampaignStatus::Active }));
}

#[tokio::test]
async fn observations_are_validated_before_any_write() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);

  let mut rows = seed_rows();
  rows.push(row(500.0, "a", 0.1, 1.0));
  let err = engine.add_observations(campaign.id, rows, "user").await.unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));

  let mut unknown = row(30.0, "a", 0.1, 1.0);
  unknown.y.insert("pureza".into(), 0.9);
  let err = engine.add_observations(campaign.id, vec![unknown], "user").await.unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));

  assert!(engine.list_observations(&campaign.id).unwrap().is_empty());
}

#[tokio::test]
async fn partial_objectives_are_accepted_and_ignored_by_metrics() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  let mut partial = row(30.0, "b", 0.9, 0.0);
  partial.y.remove("cost");
  engine.add_observations(campaign.id, vec![partial, row(50.0, "a", 0.4, 3.0)], "import").await.unwrap();

  let metrics = engine.metrics(&campaign.id, None).await.unwrap();
  assert_eq!(metrics.n_observations, 2);
  assert_eq!(metrics.best_values["yield"], 0.9);
  assert_eq!(metrics.pareto_observation_ids.len(), 1);
}

#[tokio::test]
async fn metrics_reject_reference_point_of_wrong_length() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  let err = engine.metrics(&campaign.id, Some(&[0.0])).await.unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));
  let ok = engine.metrics(&campaign.id, Some(&[0.0, 20.0])).await.unwrap();
  assert_eq!(ok.ref_point, Some(vec![0.0, 20.0]));
}

#[test]
fn process_with_invalid_space_is_rejected() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let spec = campaign_domain::ProcessSpec::new("mal",
                                               vec![campaign_domain::InputVariable::continuous("t", 5.0, 1.0)],
                                               vec![campaign_domain::Objective::maximize("y")]).unwrap();
  assert!(matches!(engine.register_process(spec), Err(EngineError::Validation(_))));
}

#[test]
fn campaign_with_unknown_capability_is_rejected() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let spec = engine.register_process(common::process()).unwrap();
  let strategies = common::strategies(&[("gp", campaign_domain::StrategyConfig::new("lhs", "gp", "qehvi"))]);
  let err = engine.create_campaign(spec.id, "c", None, Some(strategies)).unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));
}
