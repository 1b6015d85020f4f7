// registry.rs
//
// Catálogo de capacidades seleccionadas por nombre al configurar una
// estrategia. El motor depende del catálogo, nunca de implementaciones.
use crate::builtin::{IdwSurrogate, LatinHypercubeSampler, ParetoDominance, RandomAcquisition, RandomSampler,
                     UcbAcquisition, UnitCubeEncoder};
use crate::errors::{ProviderError, Result};
use crate::traits::{Acquisition, Dominance, Sampler, SpaceEncoder, SurrogateModel};
use campaign_domain::StrategyConfig;
use std::collections::HashMap;
use std::sync::Arc;

pub struct CapabilityRegistry {
  samplers: HashMap<String, Arc<dyn Sampler>>,
  models: HashMap<String, Arc<dyn SurrogateModel>>,
  acquisitions: HashMap<String, Arc<dyn Acquisition>>,
  dominance: Arc<dyn Dominance>,
  encoder: Arc<dyn SpaceEncoder>,
}

impl CapabilityRegistry {
  /// Catálogo vacío salvo dominancia y encoder, que son únicos.
  pub fn new(dominance: Arc<dyn Dominance>, encoder: Arc<dyn SpaceEncoder>) -> Self {
    Self { samplers: HashMap::new(), models: HashMap::new(), acquisitions: HashMap::new(), dominance, encoder }
  }

  /// Samplers `random`/`lhs`, modelo `idw`, adquisiciones `random`/`ucb`,
  /// dominancia de Pareto exacta y encoder al cubo unidad.
  pub fn with_builtins() -> Self {
    let mut reg = Self::new(Arc::new(ParetoDominance), Arc::new(UnitCubeEncoder));
    reg.register_sampler("random", Arc::new(RandomSampler));
    reg.register_sampler("lhs", Arc::new(LatinHypercubeSampler));
    reg.register_model("idw", Arc::new(IdwSurrogate));
    reg.register_acquisition("random", Arc::new(RandomAcquisition));
    reg.register_acquisition("ucb", Arc::new(UcbAcquisition));
    reg
  }

  pub fn register_sampler(&mut self, name: &str, sampler: Arc<dyn Sampler>) {
    self.samplers.insert(name.to_string(), sampler);
  }

  pub fn register_model(&mut self, name: &str, model: Arc<dyn SurrogateModel>) {
    self.models.insert(name.to_string(), model);
  }

  pub fn register_acquisition(&mut self, name: &str, acquisition: Arc<dyn Acquisition>) {
    self.acquisitions.insert(name.to_string(), acquisition);
  }

  pub fn sampler(&self, name: &str) -> Result<Arc<dyn Sampler>> {
    lookup(&self.samplers, "sampler", name)
  }

  pub fn model(&self, name: &str) -> Result<Arc<dyn SurrogateModel>> {
    lookup(&self.models, "model", name)
  }

  pub fn acquisition(&self, name: &str) -> Result<Arc<dyn Acquisition>> {
    lookup(&self.acquisitions, "acquisition", name)
  }

  pub fn dominance(&self) -> Arc<dyn Dominance> {
    self.dominance.clone()
  }

  pub fn encoder(&self) -> Arc<dyn SpaceEncoder> {
    self.encoder.clone()
  }

  /// Comprueba que las tres piezas de la estrategia estén registradas.
  pub fn check_strategy(&self, strategy: &StrategyConfig) -> Result<()> {
    self.sampler(&strategy.sampler)?;
    self.model(&strategy.model)?;
    self.acquisition(&strategy.acquisition)?;
    Ok(())
  }
}

fn lookup<T: ?Sized>(table: &HashMap<String, Arc<T>>, kind: &'static str, name: &str) -> Result<Arc<T>> {
  table.get(name).cloned().ok_or_else(|| {
                             log::warn!("capacidad no registrada: {} '{}'", kind, name);
                             ProviderError::UnknownCapability { kind, name: name.to_string() }
                           })
}

impl Default for CapabilityRegistry {
  fn default() -> Self {
    Self::with_builtins()
  }
}
