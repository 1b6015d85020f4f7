mod common;

use boa_workflow::{EngineError, JobDispatcher};
use campaign_domain::{Job, JobStatus, JobType, ProposeParams, StrategyConfig};
use campaign_store::{JobRepository, WriteLockCoordinator};
use chrono::Utc;
use common::{active_campaign, assert_status, engine, registry_with_doubles, seed_rows, strategies, wait_terminal};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn batch(n: usize) -> ProposeParams {
  ProposeParams { batch_size: Some(n), ..ProposeParams::default() }
}

#[tokio::test]
async fn failing_acquisition_gives_partial_result() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine,
                                 Some(strategies(&[("buena", StrategyConfig::new("lhs", "idw", "ucb")),
                                                   ("rota", StrategyConfig::new("lhs", "idw", "failing"))])));
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();

  let job_id = engine.propose(campaign.id, batch(2)).unwrap();
  engine.run_pending().await.unwrap();
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Completed);
  let result = job.result.unwrap();
  assert_eq!(result["outcome"], "partial");
  assert_eq!(result["failed_strategies"][0]["strategy_name"], "rota");
  assert_eq!(result["proposal_ids"].as_array().unwrap().len(), 1);

  let iteration = engine.get_iteration_by_index(&campaign.id, 0).unwrap();
  let proposals = engine.list_proposals(&iteration.id).unwrap();
  assert_eq!(proposals.len(), 1);
  assert_eq!(proposals[0].strategy_name, "buena");
  assert_eq!(iteration.metadata["failed_strategies"][0]["strategy_name"], "rota");
}

#[tokio::test]
async fn all_strategies_failing_fails_the_job_without_iteration() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, Some(strategies(&[("rota", StrategyConfig::new("lhs", "idw", "failing"))])));
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();

  let job_id = engine.propose(campaign.id, batch(1)).unwrap();
  engine.run_pending().await.unwrap();
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Failed);
  let result = job.result.unwrap();
  assert_eq!(result["error_kind"], "all_strategies_failed");
  assert_eq!(result["retryable"], false);
  assert_eq!(result["failed_strategies"].as_array().unwrap().len(), 1);
  assert!(engine.list_iterations(&campaign.id).unwrap().is_empty());
}

#[tokio::test]
async fn transient_sampler_failure_is_retried_once() {
  let doubles = registry_with_doubles();
  let flaky = doubles.flaky.clone();
  let (engine, _store, _blobs) = engine(doubles.registry);
  let campaign = active_campaign(&engine, Some(strategies(&[("inestable", StrategyConfig::new("flaky", "idw", "ucb"))])));

  let job_id = engine.propose(campaign.id, batch(4)).unwrap();
  engine.run_pending().await.unwrap();
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Completed);
  assert_eq!(job.result.unwrap()["outcome"], "complete");
  assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_model_hits_its_deadline() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let slow = StrategyConfig::new("lhs", "slow", "ucb").with_deadline_ms(30);
  let campaign = active_campaign(&engine,
                                 Some(strategies(&[("rapida", StrategyConfig::new("lhs", "idw", "ucb")), ("lenta", slow)])));
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();

  let job_id = engine.propose(campaign.id, batch(1)).unwrap();
  engine.run_pending().await.unwrap();
  let result = engine.get_job(&job_id).unwrap().result.unwrap();
  assert_eq!(result["outcome"], "partial");
  assert_eq!(result["failed_strategies"][0]["strategy_name"], "lenta");
  assert!(result["failed_strategies"][0]["cause"].as_str().unwrap().contains("plazo"));
}

#[tokio::test]
async fn held_lock_fails_the_job_as_retryable() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  let lease = engine.context().locks.acquire(campaign.id, "otro", Duration::ZERO).await.unwrap().unwrap();
  assert_eq!(engine.is_locked(campaign.id).await.unwrap().map(|l| l.token), Some("otro".to_string()));

  let job_id = engine.propose(campaign.id, batch(1)).unwrap();
  engine.run_pending().await.unwrap();
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Failed);
  assert_eq!(job.result.as_ref().unwrap()["error_kind"], "locked");
  assert_eq!(job.result.as_ref().unwrap()["retryable"], true);

  engine.context().locks.release(campaign.id, &lease.token).await.unwrap();
  assert!(engine.is_locked(campaign.id).await.unwrap().is_none());
  engine.propose(campaign.id, batch(1)).unwrap();
  let done = engine.run_pending().await.unwrap();
  assert_status(&done[0], JobStatus::Completed);
}

#[tokio::test]
async fn propose_is_validated_at_submit_time() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);

  let unknown = ProposeParams { strategy_names: Some(vec!["nope".into()]), ..ProposeParams::default() };
  assert!(matches!(engine.propose(campaign.id, unknown), Err(EngineError::Validation(_))));
  assert!(matches!(engine.propose(campaign.id, batch(0)), Err(EngineError::Validation(_))));
  let bad_ref = ProposeParams { ref_point: Some(vec![1.0]), ..ProposeParams::default() };
  assert!(matches!(engine.propose(campaign.id, bad_ref), Err(EngineError::Validation(_))));
  assert_eq!(engine.count_jobs(None, Some(campaign.id)).unwrap(), 0);
}

#[tokio::test]
async fn pause_does_not_cancel_queued_jobs() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  let job_id = engine.propose(campaign.id, batch(1)).unwrap();
  engine.pause(&campaign.id).unwrap();
  engine.run_pending().await.unwrap();
  assert_status(&engine.get_job(&job_id).unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn only_pending_jobs_can_be_cancelled() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);

  let queued = engine.propose(campaign.id, batch(1)).unwrap();
  assert_status(&engine.cancel_job(&queued).unwrap(), JobStatus::Cancelled);
  assert!(engine.run_pending().await.unwrap().is_empty());

  let running = engine.propose(campaign.id, batch(1)).unwrap();
  let taken = engine.context().queue.dequeue("w-0").unwrap().unwrap();
  assert_eq!(taken.id, running);
  assert!(matches!(engine.cancel_job(&running), Err(EngineError::JobAlreadyRunning { .. })));
}

#[tokio::test]
async fn export_job_bundles_the_campaign() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  engine.propose(campaign.id, batch(2)).unwrap();
  engine.run_pending().await.unwrap();

  let job_id = engine.export(campaign.id).unwrap();
  engine.run_pending().await.unwrap();
  let job = engine.get_job(&job_id).unwrap();
  assert_status(&job, JobStatus::Completed);
  let bundle = job.result.unwrap();
  assert_eq!(bundle["format_version"], 1);
  assert_eq!(bundle["campaign"]["id"], json!(campaign.id));
  assert_eq!(bundle["observations"].as_array().unwrap().len(), 3);
  assert_eq!(bundle["iterations"][0]["proposals"].as_array().unwrap().len(), 1);
  assert!(bundle["iterations"][0]["decision"].is_null());
}

#[tokio::test]
async fn job_type_without_handler_fails_validation() {
  let dispatcher = JobDispatcher::new();
  let job = Job::new(None, JobType::Export, json!({}));
  assert!(matches!(dispatcher.dispatch(&job).await, Err(EngineError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_recovers_orphans_before_serving() {
  let (engine, store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  let orphan = engine.propose(campaign.id, batch(1)).unwrap();
  // Simula una caída: el último latido quedó muy atrás.
  store.dequeue_next("w-muerto", Utc::now() - chrono::Duration::seconds(60)).unwrap().unwrap();

  let pool = engine.spawn_workers(2).unwrap();
  assert_eq!(pool.size(), 2);
  let job = engine.get_job(&orphan).unwrap();
  assert_status(&job, JobStatus::Failed);
  assert_eq!(job.result.unwrap()["error_kind"], "job_crashed");

  let fresh = engine.propose(campaign.id, batch(2)).unwrap();
  let job = wait_terminal(&engine, &fresh).await;
  assert_status(&job, JobStatus::Completed);
  pool.shutdown().await;
  assert_eq!(engine.count_jobs(Some(JobStatus::Running), None).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_pool_leaves_live_jobs_alone() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, Some(strategies(&[("lenta", StrategyConfig::new("lhs", "slow", "ucb"))])));
  engine.add_observations(campaign.id, seed_rows(), "user").await.unwrap();
  let first = engine.spawn_workers(1).unwrap();
  let job_id = engine.propose(campaign.id, batch(1)).unwrap();
  for _ in 0..100 {
    if engine.get_job(&job_id).unwrap().status == JobStatus::Running {
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  assert_status(&engine.get_job(&job_id).unwrap(), JobStatus::Running);

  // Otro proceso arranca su pool mientras el primero sigue trabajando.
  let second = engine.spawn_workers(1).unwrap();
  assert_status(&engine.get_job(&job_id).unwrap(), JobStatus::Running);

  let job = wait_terminal(&engine, &job_id).await;
  assert_status(&job, JobStatus::Completed);
  assert_eq!(job.progress, 1.0);
  assert_eq!(job.result.unwrap()["outcome"], "complete");
  assert_eq!(engine.list_iterations(&campaign.id).unwrap().len(), 1);
  first.shutdown().await;
  second.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proposes_get_consecutive_indices() {
  let (engine, _store, _blobs) = engine(registry_with_doubles().registry);
  let campaign = active_campaign(&engine, None);
  let pool = engine.spawn_workers(3).unwrap();
  let n = 4;
  let ids: Vec<_> = (0..n).map(|_| engine.propose(campaign.id, batch(1)).unwrap()).collect();
  let mut jobs = Vec::new();
  for id in ids.iter() {
    jobs.push(wait_terminal(&engine, id).await);
  }
  pool.shutdown().await;

  let (completed, failed): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|j| j.status == JobStatus::Completed);
  assert_eq!(completed.len() + failed.len(), n);
  assert!(!completed.is_empty());
  for job in failed.iter() {
    assert_status(job, JobStatus::Failed);
    let result = job.result.as_ref().unwrap();
    assert_eq!(result["retryable"], true, "job {:?}", job);
    let kind = result["error_kind"].as_str().unwrap();
    assert!(kind == "locked" || kind == "conflict", "job {:?}", job);
  }
  let indices: Vec<i64> = engine.list_iterations(&campaign.id).unwrap().iter().map(|i| i.index).collect();
  assert_eq!(indices, (0..completed.len() as i64).collect::<Vec<_>>());
  let mut reported: Vec<i64> = completed.iter().map(|j| j.result.as_ref().unwrap()["iteration_index"].as_i64().unwrap()).collect();
  reported.sort_unstable();
  assert_eq!(reported, indices);
}
