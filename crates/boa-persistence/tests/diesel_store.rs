use boa_persistence::{DieselCampaignStore, FsBlobStore};
use campaign_domain::{AcceptedCandidates, Campaign, CampaignStatus, InputVariable, JobStatus, JobType, NewObservation,
                      NewProposal, Objective, ProcessSpec, StrategyConfig};
use campaign_store::{CampaignRepository, CampaignStateController, JobQueue, JobRepository, LeaseLockCoordinator, LockRepository,
                     ModelCheckpointer, ObservationRepository, ProcessRepository, ProposalLedger, StoreError,
                     WriteLockCoordinator};
use indexmap::IndexMap;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn temp_db() -> (tempfile::TempDir, String) {
  let dir = tempfile::tempdir().unwrap();
  let url = dir.path().join(format!("boa_test_{}.db", Uuid::new_v4())).to_string_lossy().to_string();
  (dir, url)
}

fn seeded(url: &str) -> (Arc<DieselCampaignStore>, Campaign) {
  let store = Arc::new(DieselCampaignStore::new(url).unwrap());
  let spec = ProcessSpec::new("reactor",
                              vec![InputVariable::continuous("temp", 20.0, 80.0)],
                              vec![Objective::maximize("yield")]).unwrap();
  store.insert_process(&spec).unwrap();
  let mut strategies = IndexMap::new();
  strategies.insert("default".to_string(), StrategyConfig::new("lhs", "idw", "ucb"));
  let campaign = Campaign::new(spec.id, "c1", strategies).unwrap();
  store.insert_campaign(&campaign).unwrap();
  (store, campaign)
}

fn candidate(temp: f64) -> serde_json::Map<String, serde_json::Value> {
  json!({ "temp": temp }).as_object().cloned().unwrap()
}

#[test]
fn campaign_and_observations_survive_reopen() {
  let (_dir, url) = temp_db();
  let campaign_id = {
    let (store, campaign) = seeded(&url);
    let states = CampaignStateController::new(store.clone());
    states.start(&campaign.id).unwrap();
    let obs: Vec<_> = (0..3).map(|i| {
                              let mut y = BTreeMap::new();
                              y.insert("yield".to_string(), i as f64);
                              NewObservation::new(candidate(20.0 + i as f64), y).into_observation(campaign.id,
                                                                                                  vec![i as f64 / 10.0],
                                                                                                  "manual")
                            })
                            .collect();
    store.append_observations(&campaign.id, &obs, None).unwrap();
    campaign.id
  };

  let reopened = DieselCampaignStore::new(&url).unwrap();
  let campaign = reopened.get_campaign(&campaign_id).unwrap();
  assert_eq!(campaign.status, CampaignStatus::Active);
  assert_eq!(campaign.strategies["default"].model, "idw");
  let obs = reopened.list_observations(&campaign_id).unwrap();
  assert_eq!(obs.len(), 3);
  assert_eq!(obs[2].y["yield"], 2.0);
  assert_eq!(obs[0].x_raw["temp"], 20.0);
}

#[test]
fn status_update_is_compare_and_swap() {
  let (_dir, url) = temp_db();
  let (store, campaign) = seeded(&url);
  let now = chrono::Utc::now();
  assert!(store.update_campaign_status(&campaign.id, CampaignStatus::Active, CampaignStatus::Paused, now)
               .unwrap()
               .is_none());
  let c = store.update_campaign_status(&campaign.id, CampaignStatus::Created, CampaignStatus::Active, now)
               .unwrap()
               .unwrap();
  assert_eq!(c.status, CampaignStatus::Active);
  assert!(matches!(store.update_campaign_status(&Uuid::new_v4(), CampaignStatus::Created, CampaignStatus::Active, now),
                   Err(StoreError::NotFound(_))));
}

#[test]
fn ledger_indices_decisions_and_counterfactuals() {
  let (_dir, url) = temp_db();
  let (store, campaign) = seeded(&url);
  let ledger = ProposalLedger::new(store.clone());

  let (first, props) = ledger.commit_iteration(&campaign.id,
                                               "h0",
                                               json!({}),
                                               vec![NewProposal::new("default", vec![candidate(30.0), candidate(40.0)]),
                                                    NewProposal::new("explore", vec![candidate(50.0)])],
                                               None)
                             .unwrap();
  let second = ledger.append_iteration(&campaign.id, "h1", json!({}), None).unwrap();
  assert_eq!(first.index, 0);
  assert_eq!(second.index, 1);
  assert_eq!(ledger.list_proposals(&first.id).unwrap().iter().map(|p| p.strategy_name.as_str()).collect::<Vec<_>>(),
             vec!["default", "explore"]);

  let dup = ledger.add_proposal(&first.id, NewProposal::new("default", vec![candidate(60.0)]));
  assert!(matches!(dup, Err(StoreError::Conflict(_))));

  ledger.record_decision(&first.id,
                         vec![AcceptedCandidates { proposal_id: props[0].id, candidate_indices: vec![1] }],
                         Some("lote 1".into()))
        .unwrap();
  let again = ledger.record_decision(&first.id, vec![], None);
  assert!(matches!(again, Err(StoreError::DuplicateDecision(id)) if id == first.id));

  let cf = ledger.get_counterfactuals(&first.id).unwrap();
  let default_cf = cf.iter().find(|c| c.strategy_name == "default").unwrap();
  assert_eq!(default_cf.candidate_indices, vec![0]);
  let explore_cf = cf.iter().find(|c| c.strategy_name == "explore").unwrap();
  assert_eq!(explore_cf.candidate_indices, vec![0]);
}

#[test]
fn concurrent_dequeue_across_connections_is_exclusive() {
  let (_dir, url) = temp_db();
  let store = Arc::new(DieselCampaignStore::new(&url).unwrap());
  let queue = JobQueue::new(store);
  for i in 0..5 {
    queue.enqueue(None, JobType::Export, json!({ "n": i })).unwrap();
  }
  let handles: Vec<_> = (0..4).map(|w| {
                                let q = queue.clone();
                                std::thread::spawn(move || {
                                  let mut got = Vec::new();
                                  while let Some(job) = q.dequeue(&format!("w-{}", w)).unwrap() {
                                    got.push(job.id);
                                  }
                                  got
                                })
                              })
                              .collect();
  let mut all: Vec<Uuid> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
  assert_eq!(all.len(), 5);
  all.sort();
  all.dedup();
  assert_eq!(all.len(), 5);
  assert_eq!(queue.count(Some(JobStatus::Running), None).unwrap(), 5);
}

#[test]
fn orphans_and_cleanup() {
  let (_dir, url) = temp_db();
  let store = Arc::new(DieselCampaignStore::new(&url).unwrap());
  let queue = JobQueue::new(store.clone());
  let a = queue.enqueue(None, JobType::Propose, json!({})).unwrap();
  store.dequeue_next("w-muerto", chrono::Utc::now() - chrono::Duration::seconds(120)).unwrap();
  let live = queue.enqueue(None, JobType::Export, json!({})).unwrap();
  queue.dequeue("w-vivo").unwrap();
  let b = queue.enqueue(None, JobType::Propose, json!({})).unwrap();

  let orphans = queue.recover_orphans(Duration::from_secs(30)).unwrap();
  assert_eq!(orphans.len(), 1);
  let failed = queue.get(&a).unwrap();
  assert_eq!(failed.status, JobStatus::Failed);
  assert_eq!(failed.result.unwrap()["error_kind"], "job_crashed");
  assert_eq!(queue.get(&b).unwrap().status, JobStatus::Pending);

  // El job vivo sigue siendo de su worker y lo cierra él.
  assert!(queue.update_progress(&live, "w-vivo", 0.5).unwrap());
  let running = queue.get(&live).unwrap();
  assert_eq!(running.worker_id.as_deref(), Some("w-vivo"));
  assert_eq!(running.progress, 0.5);
  assert_eq!(queue.finish(&live, "w-vivo", JobStatus::Completed, None, None).unwrap().status, JobStatus::Completed);
  // El dueño caído ya no puede cerrar el suyo.
  assert_eq!(queue.finish(&a, "w-muerto", JobStatus::Completed, None, None).unwrap().status, JobStatus::Failed);

  queue.cancel(&b).unwrap();
  assert_eq!(queue.cleanup_finished(1).unwrap(), 2);
  assert_eq!(queue.count(None, None).unwrap(), 1);
}

#[tokio::test]
async fn lease_fencing_rejects_stale_holder() {
  let (_dir, url) = temp_db();
  let (store, campaign) = seeded(&url);
  let ttl = chrono::Duration::milliseconds(30);
  let stale = store.try_acquire_lease(&campaign.id, "job:a", ttl, chrono::Utc::now()).unwrap().unwrap();
  assert!(store.try_acquire_lease(&campaign.id, "job:b", ttl, chrono::Utc::now()).unwrap().is_none());

  tokio::time::sleep(Duration::from_millis(60)).await;
  let coordinator = LeaseLockCoordinator::new(store.clone(), Duration::from_secs(30));
  let fresh = coordinator.acquire(campaign.id, "job:b", Duration::from_millis(200)).await.unwrap().unwrap();
  assert_ne!(fresh.fence, stale.fence);

  let ledger = ProposalLedger::new(store.clone());
  let res = ledger.append_iteration(&campaign.id, "h", json!({}), Some(&stale));
  assert!(matches!(res, Err(StoreError::LeaseLost(_))));
  assert!(ledger.list_iterations(&campaign.id).unwrap().is_empty());
  assert!(ledger.append_iteration(&campaign.id, "h", json!({}), Some(&fresh)).is_ok());

  coordinator.release(campaign.id, "job:a").await.unwrap();
  assert!(coordinator.is_locked(campaign.id).await.unwrap().is_some());
  coordinator.release(campaign.id, "job:b").await.unwrap();
  assert!(coordinator.is_locked(campaign.id).await.unwrap().is_none());
}

#[test]
fn checkpoints_on_disk_with_retention() {
  let (dir, url) = temp_db();
  let (store, campaign) = seeded(&url);
  let blobs = Arc::new(FsBlobStore::new(dir.path().join("artifacts")).unwrap());
  let checkpointer = ModelCheckpointer::new(store.clone(), blobs);
  let ledger = ProposalLedger::new(store.clone());

  let mut iterations = Vec::new();
  for i in 0..4u8 {
    let it = ledger.append_iteration(&campaign.id, "h", json!({}), None).unwrap();
    checkpointer.save(&campaign.id, &it.id, &[i; 8], json!({}), None).unwrap();
    iterations.push(it);
  }
  let (latest, bytes) = checkpointer.load(&campaign.id, None).unwrap().unwrap();
  assert_eq!(latest.iteration_id, iterations[3].id);
  assert_eq!(bytes, vec![3u8; 8]);

  assert_eq!(checkpointer.cleanup(&campaign.id, 2).unwrap(), 2);
  assert_eq!(checkpointer.list(&campaign.id).unwrap().len(), 2);
  assert!(checkpointer.load(&campaign.id, Some(&iterations[0].id)).unwrap().is_none());
  let (_, bytes) = checkpointer.load(&campaign.id, Some(&iterations[2].id)).unwrap().unwrap();
  assert_eq!(bytes, vec![2u8; 8]);
}
