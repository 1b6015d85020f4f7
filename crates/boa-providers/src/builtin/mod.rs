// Implementaciones de referencia registradas por `CapabilityRegistry::with_builtins`.
pub mod acquisition;
pub mod encoder;
pub mod idw;
pub mod pareto;
pub mod samplers;

pub use acquisition::{RandomAcquisition, UcbAcquisition};
pub use encoder::UnitCubeEncoder;
pub use idw::{IdwModel, IdwSurrogate, IDW_MODEL_NAME};
pub use pareto::ParetoDominance;
pub use samplers::{LatinHypercubeSampler, RandomSampler};
