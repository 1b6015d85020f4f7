// errors.rs
use thiserror::Error;

/// Errores devueltos por las capacidades numéricas.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
  /// No hay implementación registrada con ese nombre.
  #[error("Capacidad no registrada: {kind} '{name}'")]
  UnknownCapability { kind: &'static str, name: String },
  /// Parámetros de la capacidad mal formados.
  #[error("Parámetros inválidos: {0}")]
  InvalidParams(String),
  /// Fila de entrada que no encaja en el espacio del proceso.
  #[error("Entrada inválida: {0}")]
  InvalidInput(String),
  /// Fallo que puede desaparecer al reintentar.
  #[error("Fallo transitorio: {0}")]
  Transient(String),
  #[error("Fallo de la capacidad: {0}")]
  Failed(String),
  #[error("Error de serialización: {0}")]
  Serialization(String),
}

impl ProviderError {
  pub fn is_transient(&self) -> bool {
    matches!(self, ProviderError::Transient(_))
  }
}

impl From<serde_json::Error> for ProviderError {
  fn from(e: serde_json::Error) -> Self {
    ProviderError::Serialization(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
