mod common;

use boa_workflow::EngineError;
use campaign_domain::{AcceptedCandidates, CampaignStatus, ProposeParams};
use common::{active_campaign, engine, registry_with_doubles, row, seed_rows};
use serde_json::{json, Value as JsonValue};

/// Claves que cambian legítimamente al importar.
const VOLATILE: &[&str] = &["id",
                            "campaign_id",
                            "process_id",
                            "iteration_id",
                            "proposal_id",
                            "created_at",
                            "updated_at",
                            "exported_at",
                            "pareto_observation_ids",
                            "best_observation_id"];

fn strip(value: &JsonValue) -> JsonValue {
  match value {
    JsonValue::Object(map) => {
      JsonValue::Object(map.iter().filter(|(k, _)| !VOLATILE.contains(&k.as_str())).map(|(k, v)| (k.clone(), strip(v))).collect())
    }
    JsonValue::Array(items) => JsonValue::Array(items.iter().map(strip).collect()),
    other => other.clone(),
  }
}

fn batch(n: usize) -> ProposeParams {
  ProposeParams { batch_size: Some(n), ..ProposeParams::default() }
}

#[tokio::test]
async fn export_import_export_keeps_the_campaign() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  engine.propose(campaign.id, batch(2)).unwrap();
  engine.run_pending().await.unwrap();
  let first = engine.get_iteration_by_index(&campaign.id, 0).unwrap();
  let proposal = &engine.list_proposals(&first.id).unwrap()[0];
  engine.decide(&first.id,
                vec![AcceptedCandidates { proposal_id: proposal.id, candidate_indices: vec![1] }],
                Some("sólo el segundo".into()))
        .unwrap();
  engine.add_observations(campaign.id, vec![row(40.0, "b", 0.61, 15.0)], "lab").await.unwrap();
  engine.propose(campaign.id, batch(1)).unwrap();
  engine.run_pending().await.unwrap();

  let original = engine.export_now(&campaign.id).unwrap();
  let imported = engine.import_bundle(original.clone()).await.unwrap();
  assert_ne!(imported.id, campaign.id);
  assert_eq!(imported.status, CampaignStatus::Active);
  assert_eq!(imported.process_id, campaign.process_id);

  let again = engine.export_now(&imported.id).unwrap();
  assert_eq!(strip(&again), strip(&original));

  let copy = engine.get_iteration_by_index(&imported.id, 0).unwrap();
  let decision = engine.get_decision(&copy.id).unwrap().unwrap();
  assert_eq!(decision.accepted[0].proposal_id, engine.list_proposals(&copy.id).unwrap()[0].id);
  assert_eq!(engine.pending_candidates(&imported.id).unwrap().len(),
             engine.pending_candidates(&campaign.id).unwrap().len());

  let before = serde_json::to_value(engine.metrics(&campaign.id, None).await.unwrap()).unwrap();
  let after = serde_json::to_value(engine.metrics(&imported.id, None).await.unwrap()).unwrap();
  assert_eq!(strip(&after), strip(&before));
}

#[tokio::test]
async fn import_into_another_store_registers_the_process() {
  let (source, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&source, None);
  source.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  source.complete(&campaign.id).unwrap();
  let bundle = source.export_now(&campaign.id).unwrap();

  let (target, _store, _blobs) = engine(registry_with_doubles().registry);
  let imported = target.import_bundle(bundle).await.unwrap();
  assert_eq!(imported.status, CampaignStatus::Completed);
  assert_ne!(imported.process_id, campaign.process_id);
  assert_eq!(target.get_process(&imported.process_id).unwrap().name, "reactor");
  assert_eq!(target.list_observations(&imported.id).unwrap().len(), 3);
  assert!(target.list_iterations(&imported.id).unwrap().is_empty());
}

#[tokio::test]
async fn malformed_bundles_write_nothing() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  engine.propose(campaign.id, batch(1)).unwrap();
  engine.propose(campaign.id, batch(1)).unwrap();
  engine.run_pending().await.unwrap();
  let bundle = engine.export_now(&campaign.id).unwrap();

  let mut future = bundle.clone();
  future["format_version"] = json!(99);
  assert!(matches!(engine.import_bundle(future).await, Err(EngineError::Validation(_))));

  let mut gap = bundle.clone();
  gap["iterations"][1]["iteration"]["index"] = json!(5);
  assert!(matches!(engine.import_bundle(gap).await, Err(EngineError::Validation(_))));

  assert!(matches!(engine.import_bundle(json!({ "campaign": {} })).await, Err(EngineError::Validation(_))));
  assert_eq!(engine.list_campaigns().unwrap().len(), 1);
}

#[tokio::test]
async fn import_reads_bundles_from_disk() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("campaña.json");
  std::fs::write(&path, serde_json::to_vec_pretty(&engine.export_now(&campaign.id).unwrap()).unwrap()).unwrap();

  let imported = engine.import_from_file(&path).await.unwrap();
  assert_eq!(engine.list_observations(&imported.id).unwrap().len(), 3);
  let missing = engine.import_from_file(&dir.path().join("no-existe.json")).await;
  assert!(matches!(missing, Err(EngineError::Validation(_))));
}
