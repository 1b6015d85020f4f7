// process.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use uuid::Uuid;

/// Fila cruda de valores de entrada (`nombre de variable -> valor`).
pub type RawCandidate = serde_json::Map<String, JsonValue>;

/// Tipo de una variable de entrada del proceso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
  Continuous { lower: f64, upper: f64 },
  Integer { lower: i64, upper: i64 },
  Categorical { choices: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVariable {
  pub name: String,
  #[serde(flatten)]
  pub kind: InputKind,
}

impl InputVariable {
  pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Self {
    Self { name: name.into(), kind: InputKind::Continuous { lower, upper } }
  }

  pub fn integer(name: impl Into<String>, lower: i64, upper: i64) -> Self {
    Self { name: name.into(), kind: InputKind::Integer { lower, upper } }
  }

  pub fn categorical<I, S>(name: impl Into<String>, choices: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    Self { name: name.into(), kind: InputKind::Categorical { choices: choices.into_iter().map(Into::into).collect() } }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
  Maximize,
  Minimize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
  pub name: String,
  pub direction: ObjectiveDirection,
}

impl Objective {
  pub fn maximize(name: impl Into<String>) -> Self {
    Self { name: name.into(), direction: ObjectiveDirection::Maximize }
  }

  pub fn minimize(name: impl Into<String>) -> Self {
    Self { name: name.into(), direction: ObjectiveDirection::Minimize }
  }

  pub fn is_maximization(&self) -> bool {
    self.direction == ObjectiveDirection::Maximize
  }

  /// Lleva un valor al espacio de maximización (minimizar == maximizar el
  /// negativo).
  pub fn to_maximization(&self, value: f64) -> f64 {
    if self.is_maximization() {
      value
    } else {
      -value
    }
  }
}

/// Configuración de una estrategia con nombre: sampler + modelo +
/// adquisición, cada uno referenciado por el nombre con el que está
/// registrado en el catálogo de capacidades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
  pub sampler: String,
  pub model: String,
  pub acquisition: String,
  #[serde(default = "empty_params")]
  pub sampler_params: JsonValue,
  #[serde(default = "empty_params")]
  pub model_params: JsonValue,
  #[serde(default = "empty_params")]
  pub acquisition_params: JsonValue,
  /// Plazo por llamada de capacidad; `None` usa el valor del motor.
  #[serde(default)]
  pub deadline_ms: Option<u64>,
}

fn empty_params() -> JsonValue {
  JsonValue::Object(Default::default())
}

impl StrategyConfig {
  pub fn new(sampler: impl Into<String>, model: impl Into<String>, acquisition: impl Into<String>) -> Self {
    Self { sampler: sampler.into(),
           model: model.into(),
           acquisition: acquisition.into(),
           sampler_params: empty_params(),
           model_params: empty_params(),
           acquisition_params: empty_params(),
           deadline_ms: None }
  }

  pub fn with_acquisition_params(mut self, params: JsonValue) -> Self {
    self.acquisition_params = params;
    self
  }

  pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
    self.deadline_ms = Some(deadline_ms);
    self
  }
}

/// Definición externa del problema: entradas, objetivos y estrategias por
/// defecto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
  pub id: Uuid,
  pub name: String,
  pub version: u32,
  pub inputs: Vec<InputVariable>,
  pub objectives: Vec<Objective>,
  #[serde(default)]
  pub strategies: IndexMap<String, StrategyConfig>,
  pub created_at: DateTime<Utc>,
}

impl ProcessSpec {
  pub fn new(name: impl Into<String>, inputs: Vec<InputVariable>, objectives: Vec<Objective>) -> Result<Self, DomainError> {
    let spec = Self { id: Uuid::new_v4(),
                      name: name.into(),
                      version: 1,
                      inputs,
                      objectives,
                      strategies: IndexMap::new(),
                      created_at: Utc::now() };
    spec.check_shape()?;
    Ok(spec)
  }

  pub fn with_strategy(mut self, name: impl Into<String>, strategy: StrategyConfig) -> Self {
    self.strategies.insert(name.into(), strategy);
    self
  }

  /// Validación estructural mínima (nombres únicos, al menos una entrada y
  /// un objetivo). La validación semántica del espacio la hace el encoder.
  pub fn check_shape(&self) -> Result<(), DomainError> {
    if self.inputs.is_empty() {
      return Err(DomainError::ValidationError("El proceso necesita al menos una variable de entrada".into()));
    }
    if self.objectives.is_empty() {
      return Err(DomainError::ValidationError("El proceso necesita al menos un objetivo".into()));
    }
    let mut seen = HashSet::new();
    for name in self.inputs.iter().map(|i| &i.name).chain(self.objectives.iter().map(|o| &o.name)) {
      if !seen.insert(name.as_str()) {
        return Err(DomainError::ValidationError(format!("Nombre duplicado en el proceso: {}", name)));
      }
    }
    Ok(())
  }

  pub fn objective_names(&self) -> Vec<&str> {
    self.objectives.iter().map(|o| o.name.as_str()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_names_are_rejected() {
    let err = ProcessSpec::new("p",
                               vec![InputVariable::continuous("x", 0.0, 1.0)],
                               vec![Objective::maximize("x")]).unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));
  }

  #[test]
  fn input_kind_serializes_with_tag() {
    let v = serde_json::to_value(InputVariable::integer("n", 1, 4)).unwrap();
    assert_eq!(v["kind"], "integer");
    assert_eq!(v["upper"], 4);
  }
}
