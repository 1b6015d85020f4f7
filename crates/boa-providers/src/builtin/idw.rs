// idw.rs
//
// Modelo sustituto por ponderación de distancia inversa. Es barato y
// determinista; sirve como referencia y para pruebas del orquestador.
use crate::errors::{ProviderError, Result};
use crate::traits::{FittedModel, SurrogateModel};
use async_trait::async_trait;
use campaign_domain::{Predictions, ProcessSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const IDW_MODEL_NAME: &str = "idw";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdwModel {
  pub x: Vec<Vec<f64>>,
  pub y: Vec<Vec<f64>>,
  pub power: f64,
  /// Longitud a partir de la cual la incertidumbre satura.
  pub length_scale: f64,
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum::<f64>().sqrt()
}

impl IdwModel {
  fn objectives(&self) -> usize {
    self.y.first().map(|r| r.len()).unwrap_or(0)
  }

  /// Media y desviación de una columna ignorando `NaN`.
  fn column_stats(&self, j: usize) -> (f64, f64) {
    let vals: Vec<f64> = self.y.iter().map(|r| r[j]).filter(|v| v.is_finite()).collect();
    if vals.is_empty() {
      return (0.0, 1.0);
    }
    let mean = vals.iter().sum::<f64>() / vals.len() as f64;
    let var = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / vals.len() as f64;
    (mean, var.sqrt().max(1e-9))
  }

  fn predict_row(&self, q: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let m = self.objectives();
    let mut mean = Vec::with_capacity(m);
    let mut std = Vec::with_capacity(m);
    for j in 0..m {
      let (col_mean, col_sd) = self.column_stats(j);
      let mut num = 0.0;
      let mut den = 0.0;
      let mut nearest = f64::INFINITY;
      let mut exact = None;
      for (xi, yi) in self.x.iter().zip(self.y.iter()) {
        let v = yi[j];
        if !v.is_finite() {
          continue;
        }
        let d = distance(q, xi);
        nearest = nearest.min(d);
        if d < 1e-12 {
          exact = Some(v);
          break;
        }
        let w = 1.0 / d.powf(self.power);
        num += w * v;
        den += w;
      }
      let mu = match exact {
        Some(v) => v,
        None if den > 0.0 => num / den,
        None => col_mean,
      };
      let spread = if nearest.is_finite() { 1.0 - (-nearest / self.length_scale).exp() } else { 1.0 };
      mean.push(mu);
      std.push(col_sd * spread);
    }
    (mean, std)
  }
}

impl FittedModel for IdwModel {
  fn model_name(&self) -> &str {
    IDW_MODEL_NAME
  }

  fn predict(&self, x: &[Vec<f64>]) -> Result<Predictions> {
    let (mean, std): (Vec<Vec<f64>>, Vec<Vec<f64>>) = x.iter().map(|q| self.predict_row(q)).unzip();
    Ok(Predictions { mean, std })
  }

  fn to_blob(&self) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(self)?)
  }
}

#[derive(Debug, Default)]
pub struct IdwSurrogate;

fn param_f64(params: &JsonValue, key: &str, default: f64) -> Result<f64> {
  match params.get(key) {
    None => Ok(default),
    Some(v) => v.as_f64()
                .filter(|f| f.is_finite() && *f > 0.0)
                .ok_or_else(|| ProviderError::InvalidParams(format!("{} debe ser un número positivo", key))),
  }
}

#[async_trait]
impl SurrogateModel for IdwSurrogate {
  async fn fit(&self,
               x: &[Vec<f64>],
               y: &[Vec<f64>],
               spec: &ProcessSpec,
               params: &JsonValue)
               -> Result<Arc<dyn FittedModel>> {
    if x.is_empty() {
      return Err(ProviderError::InvalidInput("no hay datos para ajustar".into()));
    }
    if x.len() != y.len() {
      return Err(ProviderError::InvalidInput(format!("{} filas de X y {} de Y", x.len(), y.len())));
    }
    if y.iter().any(|r| r.len() != spec.objectives.len()) {
      return Err(ProviderError::InvalidInput("Y no coincide con los objetivos del proceso".into()));
    }
    let model = IdwModel { x: x.to_vec(),
                           y: y.to_vec(),
                           power: param_f64(params, "power", 2.0)?,
                           length_scale: param_f64(params, "length_scale", 0.25)? };
    log::debug!("idw ajustado con {} filas (power={}, length_scale={})", x.len(), model.power, model.length_scale);
    Ok(Arc::new(model))
  }

  fn restore(&self, blob: &[u8]) -> Result<Arc<dyn FittedModel>> {
    let model: IdwModel = serde_json::from_slice(blob).map_err(|e| {
                                                        log::warn!("blob idw ilegible ({} bytes): {}", blob.len(), e);
                                                        ProviderError::from(e)
                                                      })?;
    Ok(Arc::new(model))
  }
}
