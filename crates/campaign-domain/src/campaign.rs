// campaign.rs
use crate::{DomainError, StrategyConfig};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Estados del ciclo de vida de una campaña.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
  Created,
  Active,
  Paused,
  Completed,
  Archived,
}

impl CampaignStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      CampaignStatus::Created => "created",
      CampaignStatus::Active => "active",
      CampaignStatus::Paused => "paused",
      CampaignStatus::Completed => "completed",
      CampaignStatus::Archived => "archived",
    }
  }
}

impl fmt::Display for CampaignStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CampaignStatus {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "created" => Ok(CampaignStatus::Created),
      "active" => Ok(CampaignStatus::Active),
      "paused" => Ok(CampaignStatus::Paused),
      "completed" => Ok(CampaignStatus::Completed),
      "archived" => Ok(CampaignStatus::Archived),
      other => Err(DomainError::ValidationError(format!("Estado de campaña desconocido: {}", other))),
    }
  }
}

/// Operaciones de transición expuestas al transporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignTransition {
  Start,
  Pause,
  Resume,
  Complete,
  Archive,
}

impl CampaignTransition {
  /// Estado destino de la transición.
  pub fn target(&self) -> CampaignStatus {
    match self {
      CampaignTransition::Start | CampaignTransition::Resume => CampaignStatus::Active,
      CampaignTransition::Pause => CampaignStatus::Paused,
      CampaignTransition::Complete => CampaignStatus::Completed,
      CampaignTransition::Archive => CampaignStatus::Archived,
    }
  }

  /// Tabla de transiciones legales. `start` sólo desde Created y `resume`
  /// sólo desde Paused aunque ambas terminen en Active.
  pub fn allowed_from(&self, from: CampaignStatus) -> bool {
    use CampaignStatus::*;
    matches!((self, from),
             (CampaignTransition::Start, Created)
             | (CampaignTransition::Pause, Active)
             | (CampaignTransition::Resume, Paused)
             | (CampaignTransition::Complete, Active | Paused)
             | (CampaignTransition::Archive, Completed | Paused))
  }

  /// Calcula el nuevo estado o devuelve `InvalidStateTransition`.
  pub fn apply(&self, from: CampaignStatus) -> Result<CampaignStatus, DomainError> {
    if self.allowed_from(from) {
      Ok(self.target())
    } else {
      Err(DomainError::InvalidStateTransition { from, to: self.target() })
    }
  }
}

/// Campaña de optimización ligada a un `ProcessSpec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
  pub id: Uuid,
  pub process_id: Uuid,
  pub name: String,
  pub description: Option<String>,
  pub status: CampaignStatus,
  /// Estrategias con nombre; el orden de inserción se conserva.
  pub strategies: IndexMap<String, StrategyConfig>,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Campaign {
  pub fn new(process_id: Uuid, name: impl Into<String>, strategies: IndexMap<String, StrategyConfig>) -> Result<Self, DomainError> {
    let name = name.into();
    if name.trim().is_empty() {
      return Err(DomainError::ValidationError("El nombre de la campaña no puede estar vacío".into()));
    }
    let now = Utc::now();
    Ok(Self { id: Uuid::new_v4(),
              process_id,
              name,
              description: None,
              status: CampaignStatus::Created,
              strategies,
              metadata: serde_json::json!({}),
              created_at: now,
              updated_at: now })
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
    self.metadata = metadata;
    self
  }

  /// `propose` y `add_observations` sólo se permiten en Active.
  pub fn ensure_active(&self) -> Result<(), DomainError> {
    if self.status == CampaignStatus::Active {
      Ok(())
    } else {
      Err(DomainError::CampaignNotActive { campaign_id: self.id, status: self.status })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use CampaignStatus::*;

  #[test]
  fn lifecycle_table_matches_operations() {
    assert_eq!(CampaignTransition::Start.apply(Created).unwrap(), Active);
    assert_eq!(CampaignTransition::Pause.apply(Active).unwrap(), Paused);
    assert_eq!(CampaignTransition::Resume.apply(Paused).unwrap(), Active);
    assert_eq!(CampaignTransition::Complete.apply(Paused).unwrap(), Completed);
    assert_eq!(CampaignTransition::Archive.apply(Completed).unwrap(), Archived);
    assert_eq!(CampaignTransition::Archive.apply(Paused).unwrap(), Archived);
  }

  #[test]
  fn start_from_paused_is_rejected() {
    match CampaignTransition::Start.apply(Paused) {
      Err(DomainError::InvalidStateTransition { from, to }) => {
        assert_eq!(from, Paused);
        assert_eq!(to, Active);
      }
      other => panic!("expected InvalidStateTransition, got {:?}", other),
    }
  }

  #[test]
  fn archived_is_terminal() {
    for t in [CampaignTransition::Start,
              CampaignTransition::Pause,
              CampaignTransition::Resume,
              CampaignTransition::Complete,
              CampaignTransition::Archive]
    {
      assert!(t.apply(Archived).is_err());
    }
  }

  #[test]
  fn status_round_trips_through_str() {
    for s in [Created, Active, Paused, Completed, Archived] {
      assert_eq!(s.as_str().parse::<CampaignStatus>().unwrap(), s);
    }
  }
}
