// Importación de paquetes de exportación.
//
// Recrea la campaña con ids nuevos: proceso (reutilizado si ya existe uno
// idéntico), campaña, observaciones, iteraciones, propuestas y decisiones.
// Todo se valida antes de escribir nada y la reproducción se hace bajo el
// lock de escritura de la campaña nueva. Observaciones e iteraciones se
// insertan en su orden cronológico original para que la curva de
// convergencia del paquete importado sea la misma.
use crate::context::EngineContext;
use crate::errors::{EngineError, Result};
use crate::handlers::{CampaignBundle, IterationBundle, EXPORT_FORMAT_VERSION};
use campaign_domain::{AcceptedCandidates, Campaign, CampaignStatus, NewProposal, Observation, ProcessSpec};
use campaign_store::Lease;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Paso de la reproducción: un lote de observaciones consecutivas o una
/// iteración completa.
enum Step<'a> {
    Observations(Vec<Observation>),
    Iteration(&'a IterationBundle, Vec<AcceptedCandidatesByPosition>),
}

/// Candidatos aceptados referidos por la posición de la propuesta dentro
/// de la iteración, ya que los ids cambian al importar.
struct AcceptedCandidatesByPosition {
    position: usize,
    candidate_indices: Vec<usize>,
}

pub struct CampaignImporter {
    ctx: Arc<EngineContext>,
}

impl CampaignImporter {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn import(&self, bundle: CampaignBundle) -> Result<Campaign> {
        if bundle.format_version != EXPORT_FORMAT_VERSION {
            return Err(EngineError::Validation(format!("versión de paquete {} no soportada (se espera {})",
                                                       bundle.format_version, EXPORT_FORMAT_VERSION)));
        }
        for strategy in bundle.campaign.strategies.values() {
            self.ctx.registry.check_strategy(strategy)?;
        }
        let (process, known) = self.resolve_process(&bundle.process)?;
        let observations = self.reencode(&process, &bundle)?;
        let steps = timeline(&bundle, observations)?;
        if !known {
            self.ctx.store.insert_process(&process)?;
            log::info!("proceso {} importado como {}", bundle.process.id, process.id);
        }

        let source = bundle.campaign.id;
        let mut fresh = Campaign::new(process.id, bundle.campaign.name.clone(), bundle.campaign.strategies.clone())?;
        fresh.description = bundle.campaign.description.clone();
        fresh.metadata = bundle.campaign.metadata.clone();
        let campaign = self.ctx.states.create(fresh)?;
        let campaign_id = campaign.id;

        let token = format!("import:{}", Uuid::new_v4());
        let ctx = self.ctx.clone();
        self.ctx
            .with_write_lock(campaign_id, &token, |lease: Lease| async move {
                for step in steps {
                    replay(&ctx, campaign_id, step, &lease)?;
                }
                Ok(())
            })
            .await?;

        let status = bundle.campaign.status;
        let campaign = if status == CampaignStatus::Created {
            campaign
        } else {
            self.ctx
                .store
                .update_campaign_status(&campaign_id, CampaignStatus::Created, status, Utc::now())?
                .ok_or_else(|| EngineError::Conflict(format!("la campaña importada {} cambió de estado", campaign_id)))?
        };
        log::info!("campaña {} importada como {} ({} observaciones, {} iteraciones)",
                   source,
                   campaign_id,
                   bundle.observations.len(),
                   bundle.iterations.len());
        Ok(campaign)
    }

    /// Reutiliza el proceso del paquete si ya existe con el mismo
    /// contenido (`true`); si no, prepara una copia con id nuevo.
    fn resolve_process(&self, spec: &ProcessSpec) -> Result<(ProcessSpec, bool)> {
        if let Ok(existing) = self.ctx.store.get_process(&spec.id) {
            if existing == *spec {
                return Ok((existing, true));
            }
        }
        spec.check_shape()?;
        let problems = self.ctx.registry.encoder().validate(spec);
        if !problems.is_empty() {
            return Err(EngineError::Validation(problems.join("; ")));
        }
        for strategy in spec.strategies.values() {
            self.ctx.registry.check_strategy(strategy)?;
        }
        let mut fresh = spec.clone();
        fresh.id = Uuid::new_v4();
        fresh.created_at = Utc::now();
        Ok((fresh, false))
    }

    /// Vuelve a codificar cada fila con el encoder actual; una fila que ya
    /// no encaja en el espacio rechaza el paquete entero.
    fn reencode(&self, spec: &ProcessSpec, bundle: &CampaignBundle) -> Result<Vec<Observation>> {
        let encoder = self.ctx.registry.encoder();
        let mut out = Vec::with_capacity(bundle.observations.len());
        for (i, o) in bundle.observations.iter().enumerate() {
            if o.y.keys().any(|k| !spec.objectives.iter().any(|obj| &obj.name == k)) {
                return Err(EngineError::Validation(format!("observación {}: objetivo desconocido", i)));
            }
            let x = encoder.encode(spec, &o.x_raw)
                           .map_err(|e| EngineError::Validation(format!("observación {}: {}", i, e)))?;
            let mut copy = o.clone();
            copy.x_encoded = x;
            out.push(copy);
        }
        out.sort_by_key(|o| o.created_at);
        Ok(out)
    }
}

/// Intercala observaciones e iteraciones por fecha de creación. Las
/// iteraciones deben venir numeradas desde 0 sin huecos y sus decisiones
/// referirse a propuestas de la propia iteración.
fn timeline(bundle: &CampaignBundle, observations: Vec<Observation>) -> Result<Vec<Step<'_>>> {
    let mut iterations: Vec<&IterationBundle> = bundle.iterations.iter().collect();
    iterations.sort_by_key(|it| it.iteration.index);
    for (expected, it) in iterations.iter().enumerate() {
        if it.iteration.index != expected as i64 {
            return Err(EngineError::Validation(format!("iteración {} fuera de secuencia (se espera {})",
                                                       it.iteration.index, expected)));
        }
    }

    let mut steps = Vec::new();
    let mut pending = observations.into_iter().peekable();
    for it in iterations {
        let mut batch = Vec::new();
        while let Some(o) = pending.next_if(|o| o.created_at <= it.iteration.created_at) {
            batch.push(o);
        }
        if !batch.is_empty() {
            steps.push(Step::Observations(batch));
        }
        steps.push(Step::Iteration(it, accepted_positions(it)?));
    }
    let rest: Vec<Observation> = pending.collect();
    if !rest.is_empty() {
        steps.push(Step::Observations(rest));
    }
    Ok(steps)
}

fn accepted_positions(it: &IterationBundle) -> Result<Vec<AcceptedCandidatesByPosition>> {
    let Some(decision) = &it.decision else {
        return Ok(Vec::new());
    };
    decision.accepted
            .iter()
            .map(|a| {
                let position = it.proposals.iter().position(|p| p.id == a.proposal_id).ok_or_else(|| {
                                   EngineError::Validation(format!("la decisión de la iteración {} cita la propuesta {} que no está en el paquete",
                                                                   it.iteration.index, a.proposal_id))
                               })?;
                Ok(AcceptedCandidatesByPosition { position, candidate_indices: a.candidate_indices.clone() })
            })
            .collect()
}

fn replay(ctx: &EngineContext, campaign_id: Uuid, step: Step<'_>, lease: &Lease) -> Result<()> {
    match step {
        Step::Observations(batch) => {
            // `created_at` se fija al insertar, siempre después de la última
            // iteración: así se conserva el orden relativo.
            let floor = ctx.store.latest_iteration(&campaign_id)?.map(|i| i.created_at + Duration::milliseconds(1));
            let now = floor.map_or_else(Utc::now, |f| f.max(Utc::now()));
            let rows: Vec<Observation> = batch.into_iter()
                                              .map(|o| Observation { id: Uuid::new_v4(), campaign_id, created_at: now, ..o })
                                              .collect();
            ctx.store.append_observations(&campaign_id, &rows, Some(lease))?;
        }
        Step::Iteration(it, accepted) => {
            let proposals: Vec<NewProposal> = it.proposals
                                                .iter()
                                                .map(|p| NewProposal { strategy_name: p.strategy_name.clone(),
                                                                       candidates: p.candidates.clone(),
                                                                       candidates_encoded: p.candidates_encoded.clone(),
                                                                       scores: p.scores.clone(),
                                                                       predictions: p.predictions.clone(),
                                                                       metadata: p.metadata.clone() })
                                                .collect();
            let (iteration, stored) = ctx.ledger.commit_iteration(&campaign_id,
                                                                  &it.iteration.dataset_hash,
                                                                  it.iteration.metadata.clone(),
                                                                  proposals,
                                                                  Some(lease))?;
            if iteration.index != it.iteration.index {
                return Err(EngineError::Conflict(format!("la iteración importada {} quedó con índice {}",
                                                         it.iteration.index, iteration.index)));
            }
            if let Some(decision) = &it.decision {
                let accepted = accepted.into_iter()
                                       .map(|a| {
                                           let proposal = stored.get(a.position).ok_or_else(|| {
                                                              EngineError::Conflict(format!("la iteración importada {} perdió propuestas",
                                                                                            it.iteration.index))
                                                          })?;
                                           Ok(AcceptedCandidates { proposal_id: proposal.id,
                                                                   candidate_indices: a.candidate_indices })
                                       })
                                       .collect::<Result<Vec<_>>>()?;
                ctx.ledger.record_decision(&iteration.id, accepted, decision.notes.clone())?;
            }
        }
    }
    Ok(())
}
