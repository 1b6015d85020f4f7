//! Tipos del dominio de campañas de optimización multiobjetivo: campañas y
//! su ciclo de vida, procesos, observaciones, el libro de propuestas
//! (iteraciones, propuestas, decisiones, contrafactuales), jobs y
//! checkpoints.
mod campaign;
mod checkpoint;
mod errors;
mod job;
mod ledger;
mod observation;
mod process;

pub use campaign::{Campaign, CampaignStatus, CampaignTransition};
pub use checkpoint::{Checkpoint, CheckpointBundle, ModelBlob, CHECKPOINT_FORMAT_VERSION};
pub use errors::DomainError;
pub use job::{Job, JobFilter, JobStatus, JobType, ProposeParams};
pub use ledger::{AcceptedCandidates, Counterfactual, Decision, Iteration, NewProposal, PendingCandidate, Predictions, Proposal};
pub use observation::{DatasetSnapshot, NewObservation, Observation};
pub use process::{InputKind, InputVariable, Objective, ObjectiveDirection, ProcessSpec, RawCandidate, StrategyConfig};
