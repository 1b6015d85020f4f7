// job.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl JobStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Running => "running",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
      JobStatus::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
  }

  /// Transiciones monótonas: Pending -> Running|Cancelled|Failed,
  /// Running -> Completed|Failed. Desde un estado terminal no se sale.
  pub fn can_transition_to(&self, next: JobStatus) -> bool {
    use JobStatus::*;
    matches!((self, next),
             (Pending, Running) | (Pending, Cancelled) | (Pending, Failed) | (Running, Completed) | (Running, Failed))
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "pending" => Ok(JobStatus::Pending),
      "running" => Ok(JobStatus::Running),
      "completed" => Ok(JobStatus::Completed),
      "failed" => Ok(JobStatus::Failed),
      "cancelled" => Ok(JobStatus::Cancelled),
      other => Err(DomainError::ValidationError(format!("Estado de job desconocido: {}", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
  Propose,
  Export,
}

impl fmt::Display for JobType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      JobType::Propose => "propose",
      JobType::Export => "export",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for JobType {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "propose" => Ok(JobType::Propose),
      "export" => Ok(JobType::Export),
      other => Err(DomainError::ValidationError(format!("Tipo de job desconocido: {}", other))),
    }
  }
}

/// Tarea persistida en la cola durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: Uuid,
  pub campaign_id: Option<Uuid>,
  pub job_type: JobType,
  pub status: JobStatus,
  pub params: JsonValue,
  pub result: Option<JsonValue>,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  /// Worker que tiene el job en ejecución.
  #[serde(default)]
  pub worker_id: Option<String>,
  /// Último latido del worker. Un job Running sin latidos recientes se
  /// considera huérfano.
  #[serde(default)]
  pub heartbeat_at: Option<DateTime<Utc>>,
  /// Avance en [0, 1].
  #[serde(default)]
  pub progress: f64,
}

impl Job {
  pub fn new(campaign_id: Option<Uuid>, job_type: JobType, params: JsonValue) -> Self {
    Self { id: Uuid::new_v4(),
           campaign_id,
           job_type,
           status: JobStatus::Pending,
           params,
           result: None,
           error: None,
           created_at: Utc::now(),
           started_at: None,
           completed_at: None,
           worker_id: None,
           heartbeat_at: None,
           progress: 0.0 }
  }

  /// Pending -> Running a nombre de `owner`.
  pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
    self.transition(JobStatus::Running, None, None, now)?;
    self.worker_id = Some(owner.to_string());
    self.heartbeat_at = Some(now);
    Ok(())
  }

  pub fn is_owned_by(&self, owner: &str) -> bool {
    self.status == JobStatus::Running && self.worker_id.as_deref() == Some(owner)
  }

  /// Registra un latido del dueño y, si se indica, el avance (acotado a
  /// [0, 1]). Devuelve `false` si `owner` ya no tiene el job.
  pub fn beat(&mut self, owner: &str, progress: Option<f64>, now: DateTime<Utc>) -> bool {
    if !self.is_owned_by(owner) {
      return false;
    }
    self.heartbeat_at = Some(now);
    if let Some(p) = progress.filter(|p| p.is_finite()) {
      self.progress = p.clamp(0.0, 1.0);
    }
    true
  }

  /// Running cuyo último latido es anterior a `stale_before`.
  pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
    self.status == JobStatus::Running && self.heartbeat_at.or(self.started_at).map_or(true, |t| t < stale_before)
  }

  /// Aplica una transición respetando la monotonía y fija las marcas de
  /// tiempo correspondientes.
  pub fn transition(&mut self,
                    next: JobStatus,
                    result: Option<JsonValue>,
                    error: Option<String>,
                    now: DateTime<Utc>)
                    -> Result<(), DomainError> {
    if !self.status.can_transition_to(next) {
      return Err(DomainError::InvalidJobTransition { job_id: self.id, from: self.status, to: next });
    }
    self.status = next;
    if next == JobStatus::Running {
      self.started_at = Some(now);
    }
    if next.is_terminal() {
      self.completed_at = Some(now);
    }
    if next == JobStatus::Completed {
      self.progress = 1.0;
    }
    if result.is_some() {
      self.result = result;
    }
    if error.is_some() {
      self.error = error;
    }
    Ok(())
  }
}

/// Filtro para listar jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
  pub campaign_id: Option<Uuid>,
  pub status: Option<JobStatus>,
  pub job_type: Option<JobType>,
}

impl JobFilter {
  pub fn matches(&self, job: &Job) -> bool {
    self.campaign_id.map_or(true, |c| job.campaign_id == Some(c))
    && self.status.map_or(true, |s| job.status == s)
    && self.job_type.map_or(true, |t| job.job_type == t)
  }
}

/// Parámetros de un job `propose`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposeParams {
  /// Candidatos por estrategia; `None` usa el valor configurado en el motor.
  #[serde(default)]
  pub batch_size: Option<usize>,
  /// Subconjunto de estrategias a ejecutar; `None` ejecuta todas.
  #[serde(default)]
  pub strategy_names: Option<Vec<String>>,
  #[serde(default)]
  pub ref_point: Option<Vec<f64>>,
  /// Fuerza el diseño inicial (sampler) aunque existan datos.
  #[serde(default)]
  pub initial_design: bool,
  #[serde(default)]
  pub seed: Option<u64>,
}
