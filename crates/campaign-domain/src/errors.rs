// errors.rs
use crate::{CampaignStatus, JobStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  ValidationError(String),
  #[error("Transición de estado inválida: {from} -> {to}")]
  InvalidStateTransition { from: CampaignStatus, to: CampaignStatus },
  #[error("La campaña {campaign_id} no está activa (estado: {status})")]
  CampaignNotActive { campaign_id: Uuid, status: CampaignStatus },
  #[error("Transición de job inválida para {job_id}: {from} -> {to}")]
  InvalidJobTransition { job_id: Uuid, from: JobStatus, to: JobStatus },
  #[error("Error de serialización: {0}")]
  SerializationError(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}
