// acquisition.rs
use super::samplers::uniform_points;
use crate::errors::{ProviderError, Result};
use crate::traits::{Acquisition, AcquisitionOutput, AcquisitionRequest};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Candidatos uniformes; los scores son la media predicha agregada.
#[derive(Debug, Default)]
pub struct RandomAcquisition;

#[async_trait]
impl Acquisition for RandomAcquisition {
  async fn propose(&self, req: AcquisitionRequest<'_>) -> Result<AcquisitionOutput> {
    let mut rng = StdRng::seed_from_u64(req.seed);
    let candidates = uniform_points(req.dimension, req.batch_size, &mut rng);
    let predictions = req.model.predict(&candidates)?;
    let scores = predictions.mean.iter().map(|m| m.iter().filter(|v| v.is_finite()).sum::<f64>()).collect();
    Ok(AcquisitionOutput { candidates, scores, predictions: Some(predictions) })
  }
}

/// Upper confidence bound escalarizado: sobre un conjunto de puntos
/// aleatorios puntúa `sum_j (mu_j - media_j + beta * sigma_j) / sd_j` y se
/// queda con los `batch_size` mejores. Si se da punto de referencia, los
/// objetivos cuya media no lo supera se penalizan.
#[derive(Debug, Default)]
pub struct UcbAcquisition;

fn column_scale(train_y: &[Vec<f64>], j: usize) -> (f64, f64) {
  let vals: Vec<f64> = train_y.iter().filter_map(|r| r.get(j).copied()).filter(|v| v.is_finite()).collect();
  if vals.is_empty() {
    return (0.0, 1.0);
  }
  let mean = vals.iter().sum::<f64>() / vals.len() as f64;
  let var = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / vals.len() as f64;
  (mean, var.sqrt().max(1e-9))
}

#[async_trait]
impl Acquisition for UcbAcquisition {
  async fn propose(&self, req: AcquisitionRequest<'_>) -> Result<AcquisitionOutput> {
    let beta = match req.params.get("beta") {
      None => 2.0,
      Some(v) => v.as_f64()
                  .filter(|b| b.is_finite() && *b >= 0.0)
                  .ok_or_else(|| ProviderError::InvalidParams("beta debe ser >= 0".into()))?,
    };
    let pool = match req.params.get("pool_size") {
      None => 256,
      Some(v) => v.as_u64().ok_or_else(|| ProviderError::InvalidParams("pool_size debe ser entero".into()))? as usize,
    };
    let pool = pool.max(req.batch_size);
    let mut rng = StdRng::seed_from_u64(req.seed);
    let points = uniform_points(req.dimension, pool, &mut rng);
    let pred = req.model.predict(&points)?;
    let m = req.spec.objectives.len();
    let scales: Vec<(f64, f64)> = (0..m).map(|j| column_scale(req.train_y, j)).collect();

    let mut scored: Vec<(usize, f64)> = (0..points.len()).map(|i| {
                                                          let mut s = 0.0;
                                                          for (j, (mean, sd)) in scales.iter().enumerate() {
                                                            let mu = pred.mean[i][j];
                                                            let sigma = pred.std[i][j];
                                                            let mut v = (mu - mean + beta * sigma) / sd;
                                                            if let Some(r) = req.ref_point.and_then(|r| r.get(j)) {
                                                              if mu <= *r {
                                                                v -= 1.0;
                                                              }
                                                            }
                                                            s += v;
                                                          }
                                                          (i, s)
                                                        })
                                                        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(req.batch_size);

    let candidates: Vec<Vec<f64>> = scored.iter().map(|(i, _)| points[*i].clone()).collect();
    let scores = scored.iter().map(|(_, s)| *s).collect();
    let predictions = req.model.predict(&candidates)?;
    Ok(AcquisitionOutput { candidates, scores, predictions: Some(predictions) })
  }
}
