use campaign_domain::{CampaignStatus, DomainError};
use campaign_store::StoreError;
use boa_providers::ProviderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fallo de una estrategia concreta dentro de una iteración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub strategy_name: String,
    pub cause: String,
}

// Errores del motor de campañas.
//
// Es la taxonomía que ve el transporte: cada variante tiene una etiqueta
// estable (`kind`) que se guarda también en el resultado de los jobs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Entrada mal formada.
    #[error("Error de validación: {0}")]
    Validation(String),

    #[error("No encontrado: {0}")]
    NotFound(String),

    #[error("Transición de estado inválida: {from} -> {to}")]
    InvalidStateTransition { from: CampaignStatus, to: CampaignStatus },

    #[error("La campaña {campaign_id} no está activa (estado: {status})")]
    CampaignNotActive { campaign_id: Uuid, status: CampaignStatus },

    /// Otra operación tiene el lock de la campaña. Reintentar más tarde.
    #[error("La campaña {campaign_id} está bloqueada por otra operación")]
    Locked { campaign_id: Uuid },

    /// Otro escritor cambió el mismo registro a la vez (CAS agotado,
    /// transición de job concurrente). Reintentar.
    #[error("Conflicto de concurrencia: {0}")]
    Conflict(String),

    #[error("La iteración {iteration_id} ya tiene una decisión")]
    DuplicateDecision { iteration_id: Uuid },

    /// Fallo de una estrategia; no aborta a sus hermanas.
    #[error("Falló la estrategia '{strategy_name}': {cause}")]
    StrategyExecutionFailed { strategy_name: String, cause: String },

    #[error("Fallaron todas las estrategias ({})", .failures.len())]
    AllStrategiesFailed { failures: Vec<StrategyFailure> },

    /// Job encontrado en ejecución tras un reinicio, o cuyo handler terminó
    /// de forma abrupta.
    #[error("El job {job_id} terminó abruptamente")]
    JobCrashed { job_id: Uuid },

    #[error("El job {job_id} ya está en ejecución")]
    JobAlreadyRunning { job_id: Uuid },

    #[error("Error de E/S de checkpoint: {0}")]
    CheckpointIo(String),

    /// Fallo de una capacidad numérica fuera de una estrategia (p.ej. el
    /// cálculo de hipervolumen del analizador).
    #[error("Fallo de capacidad: {0}")]
    Capability(String),

    /// Fallo de infraestructura; sólo aborta la operación en curso.
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

impl EngineError {
    /// `Locked`, los conflictos de concurrencia y los fallos de
    /// almacenamiento se pueden reintentar.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Locked { .. } | EngineError::Conflict(_) | EngineError::Storage(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::CampaignNotActive { .. } => "campaign_not_active",
            EngineError::Locked { .. } => "locked",
            EngineError::Conflict(_) => "conflict",
            EngineError::DuplicateDecision { .. } => "duplicate_decision",
            EngineError::StrategyExecutionFailed { .. } => "strategy_execution_failed",
            EngineError::AllStrategiesFailed { .. } => "all_strategies_failed",
            EngineError::JobCrashed { .. } => "job_crashed",
            EngineError::JobAlreadyRunning { .. } => "job_already_running",
            EngineError::CheckpointIo(_) => "checkpoint_io",
            EngineError::Capability(_) => "capability_failed",
            EngineError::Storage(_) => "storage",
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidStateTransition { from, to } => EngineError::InvalidStateTransition { from, to },
            DomainError::CampaignNotActive { campaign_id, status } => {
                EngineError::CampaignNotActive { campaign_id, status }
            }
            DomainError::ValidationError(msg) => EngineError::Validation(msg),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::DuplicateDecision(iteration_id) => EngineError::DuplicateDecision { iteration_id },
            StoreError::JobAlreadyRunning(job_id) => EngineError::JobAlreadyRunning { job_id },
            // Otro holder tomó el lease: para el cliente es lo mismo que
            // encontrar la campaña bloqueada.
            StoreError::LeaseLost(campaign_id) => EngineError::Locked { campaign_id },
            StoreError::Domain(d) => d.into(),
            StoreError::Storage(msg) | StoreError::Other(msg) => EngineError::Storage(msg),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownCapability { .. } | ProviderError::InvalidParams(_) | ProviderError::InvalidInput(_) => {
                EngineError::Validation(e.to_string())
            }
            other => EngineError::Capability(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Validation(format!("serde: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
