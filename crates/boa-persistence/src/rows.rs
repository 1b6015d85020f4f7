// Filas Diesel y conversión desde/hacia las entidades del dominio. Las
// columnas siguen el orden de `schema.rs`.
use crate::schema;
use campaign_domain::{Campaign, Checkpoint, Decision, Iteration, Job, Observation, ProcessSpec, Proposal};
use campaign_store::{Lease, Result, StoreError};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub(crate) fn ts(dt: &DateTime<Utc>) -> i64 {
  dt.timestamp_micros()
}

pub(crate) fn from_ts(v: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_micros(v).ok_or_else(|| StoreError::Storage(format!("marca de tiempo inválida: {}", v)))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| StoreError::Storage(format!("invalid uuid {}: {}", s, e)))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(v: &T) -> Result<String> {
  Ok(serde_json::to_string(v)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::processes)]
pub(crate) struct ProcessRow {
  pub id: String,
  pub name: String,
  pub version: i64,
  pub spec: String,
  pub created_at_ts: i64,
}

impl ProcessRow {
  pub fn from_domain(p: &ProcessSpec) -> Result<Self> {
    Ok(Self { id: p.id.to_string(),
              name: p.name.clone(),
              version: p.version as i64,
              spec: to_json(p)?,
              created_at_ts: ts(&p.created_at) })
  }

  pub fn into_domain(self) -> Result<ProcessSpec> {
    from_json(&self.spec)
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::campaigns)]
pub(crate) struct CampaignRow {
  pub id: String,
  pub process_id: String,
  pub name: String,
  pub description: Option<String>,
  pub status: String,
  pub strategies: String,
  pub metadata: String,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
}

impl CampaignRow {
  pub fn from_domain(c: &Campaign) -> Result<Self> {
    Ok(Self { id: c.id.to_string(),
              process_id: c.process_id.to_string(),
              name: c.name.clone(),
              description: c.description.clone(),
              status: c.status.as_str().to_string(),
              strategies: to_json(&c.strategies)?,
              metadata: to_json(&c.metadata)?,
              created_at_ts: ts(&c.created_at),
              updated_at_ts: ts(&c.updated_at) })
  }

  pub fn into_domain(self) -> Result<Campaign> {
    Ok(Campaign { id: parse_uuid(&self.id)?,
                  process_id: parse_uuid(&self.process_id)?,
                  name: self.name,
                  description: self.description,
                  status: self.status.parse()?,
                  strategies: from_json(&self.strategies)?,
                  metadata: from_json(&self.metadata)?,
                  created_at: from_ts(self.created_at_ts)?,
                  updated_at: from_ts(self.updated_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::observations)]
pub(crate) struct ObservationRow {
  pub id: String,
  pub campaign_id: String,
  pub seq: i64,
  pub x_raw: String,
  pub x_encoded: String,
  pub y: String,
  pub source: String,
  pub observed_at_ts: i64,
  pub metadata: String,
  pub created_at_ts: i64,
}

impl ObservationRow {
  pub fn from_domain(o: &Observation, seq: i64) -> Result<Self> {
    Ok(Self { id: o.id.to_string(),
              campaign_id: o.campaign_id.to_string(),
              seq,
              x_raw: to_json(&o.x_raw)?,
              x_encoded: to_json(&o.x_encoded)?,
              y: to_json(&o.y)?,
              source: o.source.clone(),
              observed_at_ts: ts(&o.observed_at),
              metadata: to_json(&o.metadata)?,
              created_at_ts: ts(&o.created_at) })
  }

  pub fn into_domain(self) -> Result<Observation> {
    Ok(Observation { id: parse_uuid(&self.id)?,
                     campaign_id: parse_uuid(&self.campaign_id)?,
                     x_raw: from_json(&self.x_raw)?,
                     x_encoded: from_json(&self.x_encoded)?,
                     y: from_json(&self.y)?,
                     source: self.source,
                     observed_at: from_ts(self.observed_at_ts)?,
                     metadata: from_json(&self.metadata)?,
                     created_at: from_ts(self.created_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::iterations)]
pub(crate) struct IterationRow {
  pub id: String,
  pub campaign_id: String,
  pub idx: i64,
  pub dataset_hash: String,
  pub metadata: String,
  pub created_at_ts: i64,
}

impl IterationRow {
  pub fn from_domain(it: &Iteration) -> Result<Self> {
    Ok(Self { id: it.id.to_string(),
              campaign_id: it.campaign_id.to_string(),
              idx: it.index,
              dataset_hash: it.dataset_hash.clone(),
              metadata: to_json(&it.metadata)?,
              created_at_ts: ts(&it.created_at) })
  }

  pub fn into_domain(self) -> Result<Iteration> {
    Ok(Iteration { id: parse_uuid(&self.id)?,
                   campaign_id: parse_uuid(&self.campaign_id)?,
                   index: self.idx,
                   dataset_hash: self.dataset_hash,
                   metadata: from_json(&self.metadata)?,
                   created_at: from_ts(self.created_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::proposals)]
pub(crate) struct ProposalRow {
  pub id: String,
  pub iteration_id: String,
  pub seq: i64,
  pub strategy_name: String,
  pub candidates: String,
  pub candidates_encoded: Option<String>,
  pub scores: Option<String>,
  pub predictions: Option<String>,
  pub metadata: String,
  pub created_at_ts: i64,
}

impl ProposalRow {
  pub fn from_domain(p: &Proposal, seq: i64) -> Result<Self> {
    Ok(Self { id: p.id.to_string(),
              iteration_id: p.iteration_id.to_string(),
              seq,
              strategy_name: p.strategy_name.clone(),
              candidates: to_json(&p.candidates)?,
              candidates_encoded: p.candidates_encoded.as_ref().map(to_json).transpose()?,
              scores: p.scores.as_ref().map(to_json).transpose()?,
              predictions: p.predictions.as_ref().map(to_json).transpose()?,
              metadata: to_json(&p.metadata)?,
              created_at_ts: ts(&p.created_at) })
  }

  pub fn into_domain(self) -> Result<Proposal> {
    Ok(Proposal { id: parse_uuid(&self.id)?,
                  iteration_id: parse_uuid(&self.iteration_id)?,
                  strategy_name: self.strategy_name,
                  candidates: from_json(&self.candidates)?,
                  candidates_encoded: self.candidates_encoded.as_deref().map(from_json).transpose()?,
                  scores: self.scores.as_deref().map(from_json).transpose()?,
                  predictions: self.predictions.as_deref().map(from_json).transpose()?,
                  metadata: from_json(&self.metadata)?,
                  created_at: from_ts(self.created_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::decisions)]
pub(crate) struct DecisionRow {
  pub id: String,
  pub iteration_id: String,
  pub accepted: String,
  pub notes: Option<String>,
  pub created_at_ts: i64,
}

impl DecisionRow {
  pub fn from_domain(d: &Decision) -> Result<Self> {
    Ok(Self { id: d.id.to_string(),
              iteration_id: d.iteration_id.to_string(),
              accepted: to_json(&d.accepted)?,
              notes: d.notes.clone(),
              created_at_ts: ts(&d.created_at) })
  }

  pub fn into_domain(self) -> Result<Decision> {
    Ok(Decision { id: parse_uuid(&self.id)?,
                  iteration_id: parse_uuid(&self.iteration_id)?,
                  accepted: from_json(&self.accepted)?,
                  notes: self.notes,
                  created_at: from_ts(self.created_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::jobs)]
pub(crate) struct JobRow {
  pub id: String,
  pub campaign_id: Option<String>,
  pub job_type: String,
  pub status: String,
  pub params: String,
  pub result: Option<String>,
  pub error: Option<String>,
  pub created_at_ts: i64,
  pub started_at_ts: Option<i64>,
  pub completed_at_ts: Option<i64>,
  pub worker_id: Option<String>,
  pub heartbeat_at_ts: Option<i64>,
  pub progress: f64,
}

impl JobRow {
  pub fn from_domain(j: &Job) -> Result<Self> {
    Ok(Self { id: j.id.to_string(),
              campaign_id: j.campaign_id.map(|c| c.to_string()),
              job_type: j.job_type.to_string(),
              status: j.status.as_str().to_string(),
              params: to_json(&j.params)?,
              result: j.result.as_ref().map(to_json).transpose()?,
              error: j.error.clone(),
              created_at_ts: ts(&j.created_at),
              started_at_ts: j.started_at.as_ref().map(ts),
              completed_at_ts: j.completed_at.as_ref().map(ts),
              worker_id: j.worker_id.clone(),
              heartbeat_at_ts: j.heartbeat_at.as_ref().map(ts),
              progress: j.progress })
  }

  pub fn into_domain(self) -> Result<Job> {
    Ok(Job { id: parse_uuid(&self.id)?,
             campaign_id: self.campaign_id.as_deref().map(parse_uuid).transpose()?,
             job_type: self.job_type.parse()?,
             status: self.status.parse()?,
             params: from_json(&self.params)?,
             result: self.result.as_deref().map(from_json).transpose()?,
             error: self.error,
             created_at: from_ts(self.created_at_ts)?,
             started_at: self.started_at_ts.map(from_ts).transpose()?,
             completed_at: self.completed_at_ts.map(from_ts).transpose()?,
             worker_id: self.worker_id,
             heartbeat_at: self.heartbeat_at_ts.map(from_ts).transpose()?,
             progress: self.progress })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::checkpoints)]
pub(crate) struct CheckpointRow {
  pub id: String,
  pub campaign_id: String,
  pub iteration_id: String,
  pub seq: i64,
  pub blob_key: String,
  pub size_bytes: i64,
  pub metadata: String,
  pub created_at_ts: i64,
}

impl CheckpointRow {
  pub fn from_domain(c: &Checkpoint, seq: i64) -> Result<Self> {
    Ok(Self { id: c.id.to_string(),
              campaign_id: c.campaign_id.to_string(),
              iteration_id: c.iteration_id.to_string(),
              seq,
              blob_key: c.blob_key.clone(),
              size_bytes: c.size_bytes as i64,
              metadata: to_json(&c.metadata)?,
              created_at_ts: ts(&c.created_at) })
  }

  pub fn into_domain(self) -> Result<Checkpoint> {
    Ok(Checkpoint { id: parse_uuid(&self.id)?,
                    campaign_id: parse_uuid(&self.campaign_id)?,
                    iteration_id: parse_uuid(&self.iteration_id)?,
                    blob_key: self.blob_key,
                    size_bytes: self.size_bytes.max(0) as u64,
                    metadata: from_json(&self.metadata)?,
                    created_at: from_ts(self.created_at_ts)? })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::campaign_leases)]
pub(crate) struct LeaseRow {
  pub campaign_id: String,
  pub token: String,
  pub fence: String,
  pub acquired_at_ts: i64,
  pub expires_at_ts: i64,
}

impl LeaseRow {
  pub fn from_domain(l: &Lease) -> Self {
    Self { campaign_id: l.campaign_id.to_string(),
           token: l.token.clone(),
           fence: l.fence.to_string(),
           acquired_at_ts: ts(&l.acquired_at),
           expires_at_ts: ts(&l.expires_at) }
  }

  pub fn into_domain(self) -> Result<Lease> {
    Ok(Lease { campaign_id: parse_uuid(&self.campaign_id)?,
               token: self.token,
               fence: parse_uuid(&self.fence)?,
               acquired_at: from_ts(self.acquired_at_ts)?,
               expires_at: from_ts(self.expires_at_ts)? })
  }
}
