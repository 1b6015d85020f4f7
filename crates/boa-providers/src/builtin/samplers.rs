// samplers.rs
use super::encoder::UnitCubeEncoder;
use crate::errors::{ProviderError, Result};
use crate::traits::{Sampler, SpaceEncoder};
use async_trait::async_trait;
use campaign_domain::{ProcessSpec, RawCandidate};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde_json::Value as JsonValue;

fn decode_all(spec: &ProcessSpec, points: Vec<Vec<f64>>) -> Result<Vec<RawCandidate>> {
  points.iter().map(|p| UnitCubeEncoder.decode(spec, p)).collect()
}

/// Puntos uniformes en el cubo unidad.
pub fn uniform_points(dim: usize, n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
  (0..n).map(|_| (0..dim).map(|_| rng.random::<f64>()).collect()).collect()
}

/// Hipercubo latino: cada dimensión se divide en `n` estratos y cada
/// estrato recibe exactamente un punto.
pub fn latin_hypercube(dim: usize, n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
  let strata: Vec<Vec<usize>> = (0..dim).map(|_| {
                                          let mut perm: Vec<usize> = (0..n).collect();
                                          perm.shuffle(rng);
                                          perm
                                        })
                                        .collect();
  (0..n).map(|i| {
          (0..dim).map(|d| {
                    let lower = strata[d][i] as f64 / n as f64;
                    lower + rng.random::<f64>() / n as f64
                  })
                  .collect()
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct RandomSampler;

#[async_trait]
impl Sampler for RandomSampler {
  async fn sample(&self, spec: &ProcessSpec, n: usize, seed: u64, _params: &JsonValue) -> Result<Vec<RawCandidate>> {
    let mut rng = StdRng::seed_from_u64(seed);
    decode_all(spec, uniform_points(UnitCubeEncoder.dimension(spec), n, &mut rng))
  }
}

#[derive(Debug, Default)]
pub struct LatinHypercubeSampler;

#[async_trait]
impl Sampler for LatinHypercubeSampler {
  async fn sample(&self, spec: &ProcessSpec, n: usize, seed: u64, params: &JsonValue) -> Result<Vec<RawCandidate>> {
    if let Some(v) = params.get("n_min") {
      let min = v.as_u64().ok_or_else(|| ProviderError::InvalidParams("n_min debe ser entero".into()))?;
      if (n as u64) < min {
        log::warn!("lhs con {} puntos por debajo de n_min={}", n, min);
        return Err(ProviderError::InvalidParams(format!("lhs requiere al menos {} puntos", min)));
      }
    }
    let mut rng = StdRng::seed_from_u64(seed);
    decode_all(spec, latin_hypercube(UnitCubeEncoder.dimension(spec), n, &mut rng))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lhs_covers_every_stratum_once() {
    let mut rng = StdRng::seed_from_u64(7);
    let pts = latin_hypercube(2, 5, &mut rng);
    for d in 0..2 {
      let mut strata: Vec<usize> = pts.iter().map(|p| (p[d] * 5.0).floor() as usize).collect();
      strata.sort_unstable();
      assert_eq!(strata, vec![0, 1, 2, 3, 4]);
    }
  }

  #[test]
  fn same_seed_same_points() {
    let a = uniform_points(3, 4, &mut StdRng::seed_from_u64(1));
    let b = uniform_points(3, 4, &mut StdRng::seed_from_u64(1));
    assert_eq!(a, b);
  }
}
