// pareto.rs
use crate::errors::{ProviderError, Result};
use crate::traits::Dominance;
use async_trait::async_trait;

/// `a` domina a `b` (maximización): no peor en ningún objetivo y mejor en
/// al menos uno.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
  let mut strictly = false;
  for (x, y) in a.iter().zip(b.iter()) {
    if x < y {
      return false;
    }
    if x > y {
      strictly = true;
    }
  }
  strictly
}

/// Índices no dominados. Las filas con valores no finitos no participan.
pub fn non_dominated(y: &[Vec<f64>]) -> Vec<usize> {
  let valid: Vec<usize> = (0..y.len()).filter(|i| y[*i].iter().all(|v| v.is_finite())).collect();
  valid.iter()
       .copied()
       .filter(|i| !valid.iter().any(|j| j != i && dominates(&y[*j], &y[*i])))
       .collect()
}

/// Hipervolumen exacto por cortes sucesivos en la última dimensión.
fn slice_volume(mut points: Vec<Vec<f64>>, reference: &[f64]) -> f64 {
  let d = reference.len();
  if points.is_empty() || d == 0 {
    return 0.0;
  }
  if d == 1 {
    return points.iter().map(|p| p[0] - reference[0]).fold(0.0, f64::max);
  }
  points.sort_by(|a, b| b[d - 1].total_cmp(&a[d - 1]));
  let mut volume = 0.0;
  for i in 0..points.len() {
    let upper = points[i][d - 1];
    let lower = if i + 1 < points.len() { points[i + 1][d - 1] } else { reference[d - 1] };
    let height = upper - lower;
    if height <= 0.0 {
      continue;
    }
    let projected: Vec<Vec<f64>> = points[..=i].iter().map(|p| p[..d - 1].to_vec()).collect();
    volume += slice_volume(projected, &reference[..d - 1]) * height;
  }
  volume
}

pub fn hypervolume(y: &[Vec<f64>], reference: &[f64]) -> Result<f64> {
  if let Some(bad) = y.iter().find(|r| r.len() != reference.len()) {
    return Err(ProviderError::InvalidInput(format!("fila de {} objetivos con punto de referencia de {}",
                                                   bad.len(),
                                                   reference.len())));
  }
  let front: Vec<Vec<f64>> = non_dominated(y).into_iter()
                                             .map(|i| y[i].clone())
                                             .filter(|p| p.iter().zip(reference.iter()).all(|(v, r)| v > r))
                                             .collect();
  Ok(slice_volume(front, reference))
}

#[derive(Debug, Default)]
pub struct ParetoDominance;

#[async_trait]
impl Dominance for ParetoDominance {
  async fn pareto_front(&self, y: &[Vec<f64>]) -> Result<Vec<usize>> {
    Ok(non_dominated(y))
  }

  async fn hypervolume(&self, y: &[Vec<f64>], ref_point: &[f64]) -> Result<f64> {
    hypervolume(y, ref_point)
  }
}
