// encoder.rs
use crate::errors::{ProviderError, Result};
use crate::traits::SpaceEncoder;
use campaign_domain::{InputKind, ProcessSpec, RawCandidate};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Lleva cada variable al intervalo [0, 1]: continuas e enteras por
/// escalado lineal, categóricas como one-hot.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitCubeEncoder;

fn scale(v: f64, lo: f64, hi: f64) -> f64 {
  if hi > lo {
    (v - lo) / (hi - lo)
  } else {
    0.0
  }
}

impl SpaceEncoder for UnitCubeEncoder {
  fn validate(&self, spec: &ProcessSpec) -> Vec<String> {
    let mut errors = Vec::new();
    for input in spec.inputs.iter() {
      match &input.kind {
        InputKind::Continuous { lower, upper } => {
          if !lower.is_finite() || !upper.is_finite() {
            errors.push(format!("{}: límites no finitos", input.name));
          } else if lower >= upper {
            errors.push(format!("{}: lower ({}) debe ser menor que upper ({})", input.name, lower, upper));
          }
        }
        InputKind::Integer { lower, upper } => {
          if lower > upper {
            errors.push(format!("{}: lower ({}) mayor que upper ({})", input.name, lower, upper));
          }
        }
        InputKind::Categorical { choices } => {
          if choices.is_empty() {
            errors.push(format!("{}: sin opciones", input.name));
          }
          let unique: HashSet<&String> = choices.iter().collect();
          if unique.len() != choices.len() {
            errors.push(format!("{}: opciones duplicadas", input.name));
          }
        }
      }
    }
    errors
  }

  fn dimension(&self, spec: &ProcessSpec) -> usize {
    spec.inputs
        .iter()
        .map(|i| match &i.kind {
          InputKind::Categorical { choices } => choices.len(),
          _ => 1,
        })
        .sum()
  }

  fn encode(&self, spec: &ProcessSpec, raw: &RawCandidate) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(self.dimension(spec));
    for input in spec.inputs.iter() {
      let value = raw.get(&input.name)
                     .ok_or_else(|| ProviderError::InvalidInput(format!("falta la variable {}", input.name)))?;
      match &input.kind {
        InputKind::Continuous { lower, upper } => {
          let v = value.as_f64()
                       .ok_or_else(|| ProviderError::InvalidInput(format!("{} debe ser numérica", input.name)))?;
          if v < *lower || v > *upper {
            return Err(ProviderError::InvalidInput(format!("{}={} fuera de [{}, {}]", input.name, v, lower, upper)));
          }
          out.push(scale(v, *lower, *upper));
        }
        InputKind::Integer { lower, upper } => {
          let v = value.as_i64()
                       .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                       .ok_or_else(|| ProviderError::InvalidInput(format!("{} debe ser entera", input.name)))?;
          if v < *lower || v > *upper {
            return Err(ProviderError::InvalidInput(format!("{}={} fuera de [{}, {}]", input.name, v, lower, upper)));
          }
          out.push(scale(v as f64, *lower as f64, *upper as f64));
        }
        InputKind::Categorical { choices } => {
          let s = value.as_str()
                       .ok_or_else(|| ProviderError::InvalidInput(format!("{} debe ser texto", input.name)))?;
          let pos = choices.iter()
                           .position(|c| c == s)
                           .ok_or_else(|| ProviderError::InvalidInput(format!("{}: opción desconocida {}", input.name, s)))?;
          out.extend((0..choices.len()).map(|i| if i == pos { 1.0 } else { 0.0 }));
        }
      }
    }
    Ok(out)
  }

  fn decode(&self, spec: &ProcessSpec, x: &[f64]) -> Result<RawCandidate> {
    let dim = self.dimension(spec);
    if x.len() != dim {
      return Err(ProviderError::InvalidInput(format!("vector de {} componentes, se esperaban {}", x.len(), dim)));
    }
    let mut raw = RawCandidate::new();
    let mut pos = 0;
    for input in spec.inputs.iter() {
      match &input.kind {
        InputKind::Continuous { lower, upper } => {
          let t = x[pos].clamp(0.0, 1.0);
          raw.insert(input.name.clone(), JsonValue::from(lower + t * (upper - lower)));
          pos += 1;
        }
        InputKind::Integer { lower, upper } => {
          let t = x[pos].clamp(0.0, 1.0);
          let v = (*lower as f64 + t * (*upper - *lower) as f64).round() as i64;
          raw.insert(input.name.clone(), JsonValue::from(v.clamp(*lower, *upper)));
          pos += 1;
        }
        InputKind::Categorical { choices } => {
          let slice = &x[pos..pos + choices.len()];
          let best = slice.iter()
                          .enumerate()
                          .fold((0usize, f64::NEG_INFINITY), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
                          .0;
          raw.insert(input.name.clone(), JsonValue::from(choices[best].clone()));
          pos += choices.len();
        }
      }
    }
    Ok(raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use campaign_domain::{InputVariable, Objective};
  use serde_json::json;

  fn spec() -> ProcessSpec {
    ProcessSpec::new("p",
                     vec![InputVariable::continuous("t", 10.0, 20.0),
                          InputVariable::integer("n", 1, 5),
                          InputVariable::categorical("c", ["a", "b", "c"])],
                     vec![Objective::maximize("y")]).unwrap()
  }

  #[test]
  fn encodes_into_unit_cube_with_one_hot() {
    let raw = json!({"t": 15.0, "n": 5, "c": "b"}).as_object().cloned().unwrap();
    let x = UnitCubeEncoder.encode(&spec(), &raw).unwrap();
    assert_eq!(x, vec![0.5, 1.0, 0.0, 1.0, 0.0]);
    assert_eq!(UnitCubeEncoder.decode(&spec(), &x).unwrap(), raw);
  }

  #[test]
  fn out_of_bounds_and_missing_are_rejected() {
    let s = spec();
    let high = json!({"t": 25.0, "n": 2, "c": "a"}).as_object().cloned().unwrap();
    assert!(UnitCubeEncoder.encode(&s, &high).is_err());
    let missing = json!({"t": 12.0, "c": "a"}).as_object().cloned().unwrap();
    assert!(UnitCubeEncoder.encode(&s, &missing).is_err());
  }

  #[test]
  fn validate_reports_bad_bounds() {
    let mut s = spec();
    s.inputs[0] = InputVariable::continuous("t", 3.0, 3.0);
    assert_eq!(UnitCubeEncoder.validate(&s).len(), 1);
  }
}
