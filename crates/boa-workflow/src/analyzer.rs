// Analizador de campañas: métricas derivadas del log de observaciones.
// Es de sólo lectura y recalcula todo en cada consulta.
use crate::errors::{EngineError, Result};
use boa_providers::Dominance;
use campaign_domain::{Observation, ProcessSpec};
use campaign_store::CampaignStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Desplazamiento mínimo del punto de referencia por defecto.
const MIN_REF_SHIFT: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveBounds {
    pub min: f64,
    pub max: f64,
}

/// Estado de la campaña al cerrar una iteración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePoint {
    pub iteration_index: i64,
    pub n_observations: usize,
    pub best_values: BTreeMap<String, f64>,
    pub hypervolume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub campaign_id: Uuid,
    pub n_observations: usize,
    pub n_iterations: usize,
    /// Mejor valor por objetivo según su dirección.
    pub best_values: BTreeMap<String, f64>,
    pub objective_bounds: BTreeMap<String, ObjectiveBounds>,
    /// Observaciones no dominadas (sólo filas con todos los objetivos).
    pub pareto_observation_ids: Vec<Uuid>,
    pub best_observation_id: Option<Uuid>,
    /// Punto de referencia usado, en las unidades de cada objetivo.
    pub ref_point: Option<Vec<f64>>,
    pub hypervolume: Option<f64>,
    pub convergence: Vec<ConvergencePoint>,
}

pub struct CampaignAnalyzer {
    store: Arc<dyn CampaignStore>,
    dominance: Arc<dyn Dominance>,
}

impl CampaignAnalyzer {
    pub fn new(store: Arc<dyn CampaignStore>, dominance: Arc<dyn Dominance>) -> Self {
        Self { store, dominance }
    }

    pub async fn metrics(&self, campaign_id: &Uuid, ref_point: Option<&[f64]>) -> Result<CampaignMetrics> {
        let campaign = self.store.get_campaign(campaign_id)?;
        let spec = self.store.get_process(&campaign.process_id)?;
        let observations = self.store.list_observations(campaign_id)?;
        let iterations = self.store.list_iterations(campaign_id)?;
        if let Some(p) = ref_point {
            if p.len() != spec.objectives.len() {
                return Err(EngineError::Validation(format!("ref_point tiene {} valores, el proceso tiene {} objetivos",
                                                           p.len(),
                                                           spec.objectives.len())));
            }
        }

        let objective_bounds = objective_bounds(&spec, &observations);
        let ref_point = match ref_point {
            Some(p) => Some(p.to_vec()),
            None => default_ref_point(&spec, &objective_bounds),
        };
        let pareto = self.pareto_members(&spec, &observations).await?;
        let hypervolume = match ref_point.as_deref() {
            Some(r) => self.hypervolume(&spec, &observations, r).await?,
            None => None,
        };

        // Historia de convergencia: observaciones registradas hasta el
        // cierre de cada iteración.
        let mut convergence = Vec::with_capacity(iterations.len());
        for iteration in iterations.iter() {
            let seen: Vec<Observation> =
                observations.iter().filter(|o| o.created_at <= iteration.created_at).cloned().collect();
            let hv = match ref_point.as_deref() {
                Some(r) => self.hypervolume(&spec, &seen, r).await?,
                None => None,
            };
            convergence.push(ConvergencePoint { iteration_index: iteration.index,
                                                n_observations: seen.len(),
                                                best_values: best_values(&spec, &seen),
                                                hypervolume: hv });
        }

        let best_observation_id = best_observation(&spec, &observations, &pareto);
        Ok(CampaignMetrics { campaign_id: *campaign_id,
                             n_observations: observations.len(),
                             n_iterations: iterations.len(),
                             best_values: best_values(&spec, &observations),
                             objective_bounds,
                             pareto_observation_ids: pareto.iter().map(|i| observations[*i].id).collect(),
                             best_observation_id,
                             ref_point,
                             hypervolume,
                             convergence })
    }

    /// Observaciones del frente de Pareto en orden de inserción.
    pub async fn pareto_front(&self, campaign_id: &Uuid) -> Result<Vec<Observation>> {
        let campaign = self.store.get_campaign(campaign_id)?;
        let spec = self.store.get_process(&campaign.process_id)?;
        let observations = self.store.list_observations(campaign_id)?;
        let members = self.pareto_members(&spec, &observations).await?;
        Ok(members.into_iter().map(|i| observations[i].clone()).collect())
    }

    /// Índices (sobre `observations`) de las filas no dominadas.
    async fn pareto_members(&self, spec: &ProcessSpec, observations: &[Observation]) -> Result<Vec<usize>> {
        let (rows, y) = complete_rows(spec, observations);
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let indices = self.dominance.pareto_front(&y).await?;
        // La capacidad es intercambiable: su salida se valida antes de usarla.
        if let Some(bad) = indices.iter().find(|i| **i >= rows.len()) {
            return Err(EngineError::Capability(format!("pareto_front devolvió el índice {} para {} filas",
                                                       bad,
                                                       rows.len())));
        }
        let mut front: Vec<usize> = indices.into_iter().map(|i| rows[i]).collect();
        front.sort_unstable();
        front.dedup();
        Ok(front)
    }

    async fn hypervolume(&self, spec: &ProcessSpec, observations: &[Observation], ref_point: &[f64]) -> Result<Option<f64>> {
        let (rows, y) = complete_rows(spec, observations);
        if rows.is_empty() {
            return Ok(None);
        }
        let r: Vec<f64> = ref_point.iter().zip(spec.objectives.iter()).map(|(v, o)| o.to_maximization(*v)).collect();
        let hv = self.dominance.hypervolume(&y, &r).await?;
        if !hv.is_finite() || hv < 0.0 {
            return Err(EngineError::Capability(format!("hipervolumen inválido: {}", hv)));
        }
        Ok(Some(hv))
    }
}

/// Filas con todos los objetivos presentes, en espacio de maximización,
/// junto con su posición original.
fn complete_rows(spec: &ProcessSpec, observations: &[Observation]) -> (Vec<usize>, Vec<Vec<f64>>) {
    let mut rows = Vec::new();
    let mut y = Vec::new();
    for (i, o) in observations.iter().enumerate() {
        let values: Option<Vec<f64>> = spec.objectives
                                           .iter()
                                           .map(|obj| o.y.get(&obj.name).map(|v| obj.to_maximization(*v)))
                                           .collect();
        if let Some(values) = values {
            rows.push(i);
            y.push(values);
        }
    }
    (rows, y)
}

pub fn objective_bounds(spec: &ProcessSpec, observations: &[Observation]) -> BTreeMap<String, ObjectiveBounds> {
    let mut out = BTreeMap::new();
    for obj in spec.objectives.iter() {
        let values = observations.iter().filter_map(|o| o.y.get(&obj.name).copied());
        let bounds = values.fold(None, |acc: Option<ObjectiveBounds>, v| match acc {
                               None => Some(ObjectiveBounds { min: v, max: v }),
                               Some(b) => Some(ObjectiveBounds { min: b.min.min(v), max: b.max.max(v) }),
                           });
        if let Some(b) = bounds {
            out.insert(obj.name.clone(), b);
        }
    }
    out
}

pub fn best_values(spec: &ProcessSpec, observations: &[Observation]) -> BTreeMap<String, f64> {
    objective_bounds(spec, observations).into_iter()
                                        .filter_map(|(name, b)| {
                                            let obj = spec.objectives.iter().find(|o| o.name == name)?;
                                            Some((name, if obj.is_maximization() { b.max } else { b.min }))
                                        })
                                        .collect()
}

/// Peor valor observado de cada objetivo desplazado un 10 % del rango (al
/// menos `MIN_REF_SHIFT`) en la dirección peor. `None` si algún objetivo
/// no tiene observaciones.
pub fn default_ref_point(spec: &ProcessSpec, bounds: &BTreeMap<String, ObjectiveBounds>) -> Option<Vec<f64>> {
    spec.objectives
        .iter()
        .map(|obj| {
            let b = bounds.get(&obj.name)?;
            let shift = ((b.max - b.min) * 0.1).max(MIN_REF_SHIFT);
            Some(if obj.is_maximization() { b.min - shift } else { b.max + shift })
        })
        .collect()
}

/// Un objetivo: la mejor fila. Varios: el primer miembro del frente.
fn best_observation(spec: &ProcessSpec, observations: &[Observation], pareto: &[usize]) -> Option<Uuid> {
    if spec.objectives.len() == 1 {
        let obj = &spec.objectives[0];
        return observations.iter()
                           .filter_map(|o| o.y.get(&obj.name).map(|v| (o.id, obj.to_maximization(*v))))
                           .fold(None, |best: Option<(Uuid, f64)>, (id, v)| match best {
                               Some((_, bv)) if bv >= v => best,
                               _ => Some((id, v)),
                           })
                           .map(|(id, _)| id);
    }
    pareto.first().map(|i| observations[*i].id)
}
