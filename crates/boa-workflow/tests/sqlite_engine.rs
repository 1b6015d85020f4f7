mod common;

use boa_persistence::{DieselCampaignStore, FsBlobStore};
use boa_providers::CapabilityRegistry;
use boa_workflow::CampaignEngine;
use campaign_domain::{JobStatus, ProposeParams};
use common::{assert_status, seed_rows, test_config};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn engine_runs_on_sqlite_and_filesystem_blobs() {
  let dir = tempfile::tempdir().unwrap();
  let url = dir.path().join(format!("engine_{}.db", Uuid::new_v4())).to_string_lossy().to_string();
  let blobs = Arc::new(FsBlobStore::new(dir.path().join("artifacts")).unwrap());

  let campaign_id = {
    let store = Arc::new(DieselCampaignStore::new(&url).unwrap());
    let engine =
      CampaignEngine::new(store, blobs.clone(), Arc::new(CapabilityRegistry::with_builtins()), test_config()).unwrap();
    let spec = engine.register_process(common::process()).unwrap();
    let campaign = engine.create_campaign(spec.id, "sqlite", None, None).unwrap();
    engine.start(&campaign.id).unwrap();
    engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
    let job_id = engine.propose(campaign.id, ProposeParams { batch_size: Some(2), ..ProposeParams::default() })
                       .unwrap();
    engine.run_pending().await.unwrap();
    assert_status(&engine.get_job(&job_id).unwrap(), JobStatus::Completed);
    campaign.id
  };

  // Reabrir: todo lo confirmado sigue ahí, incluido el checkpoint.
  let store = Arc::new(DieselCampaignStore::new(&url).unwrap());
  let engine = CampaignEngine::new(store, blobs, Arc::new(CapabilityRegistry::with_builtins()), test_config()).unwrap();
  assert_eq!(engine.list_observations(&campaign_id).unwrap().len(), 3);
  let iterations = engine.list_iterations(&campaign_id).unwrap();
  assert_eq!(iterations.len(), 1);
  let (checkpoint, bundle) = engine.load_checkpoint(&campaign_id, Some(&iterations[0].id)).unwrap().unwrap();
  assert!(dir.path().join("artifacts").join(&checkpoint.blob_key).exists());
  assert_eq!(bundle.models.len(), 1);
  assert!(engine.recover_orphans().unwrap().is_empty());
}
