// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// `InMemoryCampaignStore` guarda todo bajo un único mutex, de modo que cada
// operación del trait es atómica igual que una transacción. No es durable.
use crate::errors::{Result, StoreError};
use crate::lock::Lease;
use crate::repository::{BlobStore, CampaignRepository, CheckpointRepository, JobRepository, LedgerRepository,
                        LockRepository, ObservationRepository, ProcessRepository};
use campaign_domain::{Campaign, CampaignStatus, Checkpoint, Decision, DomainError, Iteration, Job, JobFilter, JobStatus, NewProposal,
                      Observation, ProcessSpec, Proposal};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    processes: HashMap<Uuid, ProcessSpec>,
    campaigns: HashMap<Uuid, Campaign>,
    /// Observaciones por campaña en orden de inserción.
    observations: HashMap<Uuid, Vec<Observation>>,
    iterations: Vec<Iteration>,
    proposals: Vec<Proposal>,
    decisions: HashMap<Uuid, Decision>,
    jobs: HashMap<Uuid, Job>,
    /// Checkpoints en orden de creación.
    checkpoints: Vec<Checkpoint>,
    leases: HashMap<Uuid, Lease>,
}

impl State {
    fn check_fence(&self, campaign_id: &Uuid, fence: Option<&Lease>) -> Result<()> {
        match fence {
            Some(lease) => {
                if &lease.campaign_id != campaign_id {
                    return Err(StoreError::LeaseLost(*campaign_id));
                }
                lease.verify_against(self.leases.get(campaign_id), Utc::now())
            }
            None => Ok(()),
        }
    }

    fn require_campaign(&self, campaign_id: &Uuid) -> Result<()> {
        if self.campaigns.contains_key(campaign_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("campaign {}", campaign_id)))
        }
    }
}

/// Almacén de campañas en memoria (no durable).
pub struct InMemoryCampaignStore {
    state: Mutex<State>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `StoreError::Storage`.
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|e| StoreError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRepository for InMemoryCampaignStore {
    fn insert_process(&self, spec: &ProcessSpec) -> Result<()> {
        let mut st = self.lock()?;
        if st.processes.contains_key(&spec.id) {
            return Err(StoreError::Conflict(format!("process {} ya existe", spec.id)));
        }
        st.processes.insert(spec.id, spec.clone());
        Ok(())
    }

    fn get_process(&self, process_id: &Uuid) -> Result<ProcessSpec> {
        self.lock()?
            .processes
            .get(process_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("process {}", process_id)))
    }

    fn list_processes(&self) -> Result<Vec<ProcessSpec>> {
        let mut out: Vec<ProcessSpec> = self.lock()?.processes.values().cloned().collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }
}

impl CampaignRepository for InMemoryCampaignStore {
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let mut st = self.lock()?;
        if !st.processes.contains_key(&campaign.process_id) {
            return Err(StoreError::NotFound(format!("process {}", campaign.process_id)));
        }
        if st.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Conflict(format!("campaign {} ya existe", campaign.id)));
        }
        st.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn get_campaign(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.lock()?
            .campaigns
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("campaign {}", campaign_id)))
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut out: Vec<Campaign> = self.lock()?.campaigns.values().cloned().collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    fn update_campaign_status(&self,
                              campaign_id: &Uuid,
                              expected: CampaignStatus,
                              next: CampaignStatus,
                              now: DateTime<Utc>)
                              -> Result<Option<Campaign>> {
        let mut st = self.lock()?;
        let campaign = st.campaigns
                         .get_mut(campaign_id)
                         .ok_or_else(|| StoreError::NotFound(format!("campaign {}", campaign_id)))?;
        if campaign.status != expected {
            return Ok(None);
        }
        campaign.status = next;
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }
}

impl ObservationRepository for InMemoryCampaignStore {
    fn append_observations(&self, campaign_id: &Uuid, observations: &[Observation], fence: Option<&Lease>) -> Result<()> {
        let mut st = self.lock()?;
        st.require_campaign(campaign_id)?;
        st.check_fence(campaign_id, fence)?;
        st.observations.entry(*campaign_id).or_default().extend(observations.iter().cloned());
        Ok(())
    }

    fn list_observations(&self, campaign_id: &Uuid) -> Result<Vec<Observation>> {
        Ok(self.lock()?.observations.get(campaign_id).cloned().unwrap_or_default())
    }

    fn count_observations(&self, campaign_id: &Uuid) -> Result<usize> {
        Ok(self.lock()?.observations.get(campaign_id).map(|v| v.len()).unwrap_or(0))
    }
}

impl LedgerRepository for InMemoryCampaignStore {
    fn append_iteration(&self,
                        campaign_id: &Uuid,
                        dataset_hash: &str,
                        metadata: JsonValue,
                        proposals: Vec<NewProposal>,
                        fence: Option<&Lease>)
                        -> Result<(Iteration, Vec<Proposal>)> {
        let mut st = self.lock()?;
        st.require_campaign(campaign_id)?;
        st.check_fence(campaign_id, fence)?;
        let mut names: Vec<&str> = proposals.iter().map(|p| p.strategy_name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(DomainError::ValidationError("estrategia repetida en la misma iteración".into()).into());
        }
        let index = st.iterations
                      .iter()
                      .filter(|it| &it.campaign_id == campaign_id)
                      .map(|it| it.index + 1)
                      .max()
                      .unwrap_or(0);
        let iteration = Iteration { id: Uuid::new_v4(),
                                    campaign_id: *campaign_id,
                                    index,
                                    dataset_hash: dataset_hash.to_string(),
                                    metadata,
                                    created_at: Utc::now() };
        let stored: Vec<Proposal> = proposals.into_iter().map(|p| p.into_proposal(iteration.id)).collect();
        st.iterations.push(iteration.clone());
        st.proposals.extend(stored.iter().cloned());
        Ok((iteration, stored))
    }

    fn insert_proposal(&self, iteration_id: &Uuid, proposal: NewProposal) -> Result<Proposal> {
        let mut st = self.lock()?;
        if !st.iterations.iter().any(|it| &it.id == iteration_id) {
            return Err(StoreError::NotFound(format!("iteration {}", iteration_id)));
        }
        if st.proposals
             .iter()
             .any(|p| &p.iteration_id == iteration_id && p.strategy_name == proposal.strategy_name)
        {
            return Err(StoreError::Conflict(format!("la estrategia {} ya tiene propuesta en la iteración {}",
                                                    proposal.strategy_name, iteration_id)));
        }
        let stored = proposal.into_proposal(*iteration_id);
        st.proposals.push(stored.clone());
        Ok(stored)
    }

    fn get_iteration(&self, iteration_id: &Uuid) -> Result<Iteration> {
        self.lock()?
            .iterations
            .iter()
            .find(|it| &it.id == iteration_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("iteration {}", iteration_id)))
    }

    fn get_iteration_by_index(&self, campaign_id: &Uuid, index: i64) -> Result<Iteration> {
        self.lock()?
            .iterations
            .iter()
            .find(|it| &it.campaign_id == campaign_id && it.index == index)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("iteration {} de la campaña {}", index, campaign_id)))
    }

    fn list_iterations(&self, campaign_id: &Uuid) -> Result<Vec<Iteration>> {
        let mut out: Vec<Iteration> =
            self.lock()?.iterations.iter().filter(|it| &it.campaign_id == campaign_id).cloned().collect();
        out.sort_by_key(|it| it.index);
        Ok(out)
    }

    fn latest_iteration(&self, campaign_id: &Uuid) -> Result<Option<Iteration>> {
        Ok(self.lock()?
               .iterations
               .iter()
               .filter(|it| &it.campaign_id == campaign_id)
               .max_by_key(|it| it.index)
               .cloned())
    }

    fn get_proposal(&self, proposal_id: &Uuid) -> Result<Proposal> {
        self.lock()?
            .proposals
            .iter()
            .find(|p| &p.id == proposal_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("proposal {}", proposal_id)))
    }

    fn list_proposals(&self, iteration_id: &Uuid) -> Result<Vec<Proposal>> {
        Ok(self.lock()?.proposals.iter().filter(|p| &p.iteration_id == iteration_id).cloned().collect())
    }

    fn insert_decision(&self, decision: &Decision) -> Result<()> {
        let mut st = self.lock()?;
        if !st.iterations.iter().any(|it| it.id == decision.iteration_id) {
            return Err(StoreError::NotFound(format!("iteration {}", decision.iteration_id)));
        }
        if st.decisions.contains_key(&decision.iteration_id) {
            return Err(StoreError::DuplicateDecision(decision.iteration_id));
        }
        st.decisions.insert(decision.iteration_id, decision.clone());
        Ok(())
    }

    fn get_decision(&self, iteration_id: &Uuid) -> Result<Option<Decision>> {
        Ok(self.lock()?.decisions.get(iteration_id).cloned())
    }
}

fn newest_first(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

impl JobRepository for InMemoryCampaignStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let mut st = self.lock()?;
        if st.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} ya existe", job.id)));
        }
        st.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get_job(&self, job_id: &Uuid) -> Result<Job> {
        self.lock()?
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))
    }

    fn dequeue_next(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut st = self.lock()?;
        let next_id = st.jobs
                        .values()
                        .filter(|j| j.status == JobStatus::Pending)
                        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
                        .map(|j| j.id);
        match next_id {
            Some(id) => {
                let job = st.jobs
                            .get_mut(&id)
                            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
                job.claim(owner, now)?;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    fn heartbeat_job(&self, job_id: &Uuid, owner: &str, progress: Option<f64>, now: DateTime<Utc>) -> Result<bool> {
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(job_id)
                    .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        Ok(job.beat(owner, progress, now))
    }

    fn finish_job(&self,
                  job_id: &Uuid,
                  owner: &str,
                  next: JobStatus,
                  result: Option<JsonValue>,
                  error: Option<String>,
                  now: DateTime<Utc>)
                  -> Result<Option<Job>> {
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(job_id)
                    .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        if !job.is_owned_by(owner) {
            return Ok(None);
        }
        job.transition(next, result, error, now)?;
        Ok(Some(job.clone()))
    }

    fn transition_job(&self,
                      job_id: &Uuid,
                      next: JobStatus,
                      result: Option<JsonValue>,
                      error: Option<String>,
                      now: DateTime<Utc>)
                      -> Result<Job> {
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(job_id)
                    .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        job.transition(next, result, error, now)?;
        Ok(job.clone())
    }

    fn cancel_job(&self, job_id: &Uuid, now: DateTime<Utc>) -> Result<Job> {
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(job_id)
                    .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        match job.status {
            JobStatus::Pending => {
                job.transition(JobStatus::Cancelled, None, None, now)?;
                Ok(job.clone())
            }
            JobStatus::Running => Err(StoreError::JobAlreadyRunning(*job_id)),
            _ => Ok(job.clone()),
        }
    }

    fn list_jobs(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<Vec<Job>> {
        let mut out: Vec<Job> = self.lock()?.jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        out.sort_by(newest_first);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    fn count_jobs(&self, status: Option<JobStatus>, campaign_id: Option<Uuid>) -> Result<usize> {
        let filter = JobFilter { campaign_id, status, job_type: None };
        Ok(self.lock()?.jobs.values().filter(|j| filter.matches(j)).count())
    }

    fn mark_orphans_failed(&self,
                           stale_before: DateTime<Utc>,
                           error: &str,
                           result: JsonValue,
                           now: DateTime<Utc>)
                           -> Result<Vec<Job>> {
        let mut st = self.lock()?;
        let mut failed = Vec::new();
        for job in st.jobs.values_mut().filter(|j| j.is_stale(stale_before)) {
            job.transition(JobStatus::Failed, Some(result.clone()), Some(error.to_string()), now)?;
            failed.push(job.clone());
        }
        Ok(failed)
    }

    fn cleanup_finished(&self, keep_last: usize) -> Result<usize> {
        let mut st = self.lock()?;
        let mut finished: Vec<(DateTime<Utc>, Uuid)> =
            st.jobs
              .values()
              .filter(|j| j.status.is_terminal())
              .map(|j| (j.completed_at.unwrap_or(j.created_at), j.id))
              .collect();
        finished.sort_by(|a, b| b.cmp(a));
        let doomed: Vec<Uuid> = finished.into_iter().skip(keep_last).map(|(_, id)| id).collect();
        for id in doomed.iter() {
            st.jobs.remove(id);
        }
        Ok(doomed.len())
    }
}

impl CheckpointRepository for InMemoryCampaignStore {
    fn insert_checkpoint(&self, checkpoint: &Checkpoint, fence: Option<&Lease>) -> Result<()> {
        let mut st = self.lock()?;
        st.require_campaign(&checkpoint.campaign_id)?;
        st.check_fence(&checkpoint.campaign_id, fence)?;
        st.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn list_checkpoints(&self, campaign_id: &Uuid) -> Result<Vec<Checkpoint>> {
        Ok(self.lock()?.checkpoints.iter().rev().filter(|c| &c.campaign_id == campaign_id).cloned().collect())
    }

    fn latest_checkpoint(&self, campaign_id: &Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?.checkpoints.iter().rev().find(|c| &c.campaign_id == campaign_id).cloned())
    }

    fn checkpoint_for_iteration(&self, campaign_id: &Uuid, iteration_id: &Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?
               .checkpoints
               .iter()
               .rev()
               .find(|c| &c.campaign_id == campaign_id && &c.iteration_id == iteration_id)
               .cloned())
    }

    fn delete_checkpoint(&self, checkpoint_id: &Uuid) -> Result<()> {
        let mut st = self.lock()?;
        let before = st.checkpoints.len();
        st.checkpoints.retain(|c| &c.id != checkpoint_id);
        if st.checkpoints.len() == before {
            return Err(StoreError::NotFound(format!("checkpoint {}", checkpoint_id)));
        }
        Ok(())
    }
}

impl LockRepository for InMemoryCampaignStore {
    fn try_acquire_lease(&self, campaign_id: &Uuid, token: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Option<Lease>> {
        let mut st = self.lock()?;
        let next = Lease::next_for(st.leases.get(campaign_id), *campaign_id, token, ttl, now);
        if let Some(lease) = next.as_ref() {
            st.leases.insert(*campaign_id, lease.clone());
        }
        Ok(next)
    }

    fn release_lease(&self, campaign_id: &Uuid, token: &str) -> Result<bool> {
        let mut st = self.lock()?;
        match st.leases.get(campaign_id) {
            Some(current) if current.token == token => {
                st.leases.remove(campaign_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_lease(&self, campaign_id: &Uuid) -> Result<Option<Lease>> {
        Ok(self.lock()?.leases.get(campaign_id).cloned())
    }
}

/// Blob store en memoria.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|e| StoreError::Storage(format!("mutex poisoned: {:?}", e)))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|e| StoreError::Storage(format!("mutex poisoned: {:?}", e)))?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", key)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|e| StoreError::Storage(format!("mutex poisoned: {:?}", e)))?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", key)))
    }
}
