// Archivo: errors.rs
// Propósito: errores de la capa de almacenamiento y coordinación de campañas
// y el alias Result<T> usado por las APIs del crate.
use campaign_domain::DomainError;
use thiserror::Error;
use uuid::Uuid;

/// Errores comunes del almacén de campañas.
///
/// - `NotFound`: entidad no encontrada.
/// - `Conflict`: conflicto de concurrencia o de unicidad.
/// - `Storage`: fallo del motor de persistencia (reintentable por el caller).
/// - `LeaseLost`: escritura con un lease que ya no es el vigente.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No encontrado: {0}")]
    NotFound(String),
    #[error("Conflicto: {0}")]
    Conflict(String),
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// La iteración ya tiene una decisión registrada.
    #[error("La iteración {0} ya tiene una decisión")]
    DuplicateDecision(Uuid),
    /// Sólo los jobs pendientes se pueden cancelar.
    #[error("El job {0} ya está en ejecución")]
    JobAlreadyRunning(Uuid),
    /// El lease de la campaña expiró o fue tomado por otro holder.
    #[error("Lease perdido para la campaña {0}")]
    LeaseLost(Uuid),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Otro: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(format!("serde: {}", e))
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, StoreError>;
