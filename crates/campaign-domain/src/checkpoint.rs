// checkpoint.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Versión del sobre con el que se serializan los modelos de un checkpoint.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Metadatos de un checkpoint. El blob vive en un `BlobStore` y aquí sólo se
/// guarda su clave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub id: Uuid,
  pub campaign_id: Uuid,
  pub iteration_id: Uuid,
  pub blob_key: String,
  pub size_bytes: u64,
  pub metadata: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

/// Modelo ajustado de una estrategia, tal como lo serializa el proveedor.
/// El contenido es opaco para el orquestador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBlob {
  pub strategy_name: String,
  pub model_name: String,
  #[serde(with = "base64_bytes")]
  pub data: Vec<u8>,
}

/// Sobre versionado con todos los modelos de una iteración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBundle {
  pub format_version: u32,
  pub models: Vec<ModelBlob>,
}

impl CheckpointBundle {
  pub fn new(models: Vec<ModelBlob>) -> Self {
    Self { format_version: CHECKPOINT_FORMAT_VERSION, models }
  }

  pub fn model_for(&self, strategy_name: &str) -> Option<&ModelBlob> {
    self.models.iter().find(|m| m.strategy_name == strategy_name)
  }
}

mod base64_bytes {
  use base64::engine::general_purpose::STANDARD;
  use base64::Engine;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(d)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
  }
}
