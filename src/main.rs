use boa_persistence::FsBlobStore;
use boa_providers::CapabilityRegistry;
use boa_workflow::{CampaignEngine, EngineConfig};
use campaign_domain::{AcceptedCandidates, CampaignTransition, InputVariable, NewObservation, Objective, ProcessSpec,
                      ProposeParams};
use std::collections::BTreeMap;
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Menú interactivo para operar campañas de optimización.
///
/// Levanta el motor sobre el backend Diesel configurado
/// (`BOA_DATABASE_URL`), guarda los checkpoints en `BOA_ARTIFACTS_DIR` y
/// arranca un pool de workers que procesa los jobs en segundo plano.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                             .init();

    let config = EngineConfig::from_env()?;
    let store = Arc::new(boa_persistence::open(&config.database_url)?);
    let blobs = Arc::new(FsBlobStore::new(config.artifacts_dir.clone())?);
    let engine = CampaignEngine::new(store, blobs, Arc::new(CapabilityRegistry::with_builtins()), config)?;
    let pool = engine.spawn_workers(0)?;
    log::info!("motor listo con {} workers", pool.size());

    loop {
        println!("\n== Campañas BO ==");
        println!("1) Registrar proceso de ejemplo (reactor)");
        println!("2) Listar procesos y campañas");
        println!("3) Crear campaña");
        println!("4) Cambiar estado de una campaña");
        println!("5) Añadir observación");
        println!("6) Proponer candidatos");
        println!("7) Ver job");
        println!("8) Ver iteraciones y registrar decisión");
        println!("9) Métricas");
        println!("10) Exportar campaña");
        println!("11) Importar campaña desde fichero");
        println!("12) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => match demo_process().and_then(|spec| engine.register_process(spec).map_err(Into::into)) {
                Ok(spec) => println!("Proceso registrado: {} ({})", spec.id, spec.name),
                Err(e) => eprintln!("Error registrando proceso: {}", e),
            },
            "2" => {
                match engine.list_processes() {
                    Ok(processes) => {
                        println!("\nPROCESO                              | NOMBRE");
                        for p in processes {
                            println!("{} | {}", p.id, p.name);
                        }
                    }
                    Err(e) => eprintln!("Error listando procesos: {}", e),
                }
                match engine.list_campaigns() {
                    Ok(campaigns) => {
                        println!("\nCAMPAÑA                              | ESTADO    | NOMBRE");
                        for c in campaigns {
                            println!("{} | {:<9} | {}", c.id, c.status, c.name);
                        }
                    }
                    Err(e) => eprintln!("Error listando campañas: {}", e),
                }
            }
            "3" => {
                let Some(process_id) = read_uuid("Id del proceso: ")? else { continue };
                let name = prompt("Nombre de la campaña: ")?;
                let description = prompt("Descripción (enter para vacío): ")?;
                let description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
                match engine.create_campaign(process_id, name.trim(), description, None) {
                    Ok(c) => println!("Campaña creada: {} (estrategias: {:?})", c.id, c.strategies.keys().collect::<Vec<_>>()),
                    Err(e) => eprintln!("Error creando campaña: {}", e),
                }
            }
            "4" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                let op = prompt("Operación (start/pause/resume/complete/archive): ")?;
                let transition = match op.trim() {
                    "start" => CampaignTransition::Start,
                    "pause" => CampaignTransition::Pause,
                    "resume" => CampaignTransition::Resume,
                    "complete" => CampaignTransition::Complete,
                    "archive" => CampaignTransition::Archive,
                    other => {
                        eprintln!("Operación desconocida: {}", other);
                        continue;
                    }
                };
                match engine.transition(&campaign_id, transition) {
                    Ok(c) => println!("Campaña {} ahora en {}", c.id, c.status),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "5" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                let x = prompt("Entradas en JSON (ej: {\"temp\": 40, \"catalyst\": \"pd\"}): ")?;
                let y = prompt("Objetivos en JSON (ej: {\"yield\": 0.7, \"cost\": 12}): ")?;
                let row = match parse_observation(&x, &y) {
                    Ok(r) => r,
                    Err(e) => {
                        eprintln!("Entrada inválida: {}", e);
                        continue;
                    }
                };
                match engine.add_observations(campaign_id, vec![row], "user").await {
                    Ok(added) => println!("Observación añadida: {}", added[0].id),
                    Err(e) => eprintln!("Error añadiendo observación: {}", e),
                }
            }
            "6" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                let batch = prompt("Candidatos por estrategia (enter para el valor por defecto): ")?;
                let batch_size = match batch.trim() {
                    "" => None,
                    s => match s.parse::<usize>() {
                        Ok(n) => Some(n),
                        Err(_) => {
                            eprintln!("Número inválido");
                            continue;
                        }
                    },
                };
                let params = ProposeParams { batch_size, ..ProposeParams::default() };
                match engine.propose(campaign_id, params) {
                    Ok(job_id) => println!("Job encolado: {}", job_id),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "7" => {
                let Some(job_id) = read_uuid("Id del job: ")? else { continue };
                match engine.get_job(&job_id) {
                    Ok(job) => {
                        println!("Job {} ({}) -> {} [{:.0}%]", job.id, job.job_type, job.status, job.progress * 100.0);
                        if let Some(result) = job.result {
                            println!("{}", serde_json::to_string_pretty(&result)?);
                        }
                        if let Some(error) = job.error {
                            println!("Error: {}", error);
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "8" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                if let Err(e) = show_and_decide(&engine, &campaign_id) {
                    eprintln!("Error: {}", e);
                }
            }
            "9" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                match engine.metrics(&campaign_id, None).await {
                    Ok(m) => println!("{}", serde_json::to_string_pretty(&m)?),
                    Err(e) => eprintln!("Error calculando métricas: {}", e),
                }
            }
            "10" => {
                let Some(campaign_id) = read_uuid("Id de la campaña: ")? else { continue };
                match engine.export(campaign_id) {
                    Ok(job_id) => println!("Exportación encolada: {} (consulta el resultado con la opción 7)", job_id),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "11" => {
                let path = prompt("Ruta del paquete JSON: ")?;
                match engine.import_from_file(Path::new(path.trim())).await {
                    Ok(c) => println!("Campaña importada: {} ({}, {})", c.id, c.name, c.status),
                    Err(e) => eprintln!("Error importando: {}", e),
                }
            }
            "12" => {
                println!("Saliendo...");
                break;
            }
            other => println!("Opción inválida: {}", other),
        }
    }

    pool.shutdown().await;
    Ok(())
}

fn demo_process() -> Result<ProcessSpec, Box<dyn Error>> {
    Ok(ProcessSpec::new("reactor",
                        vec![InputVariable::continuous("temp", 20.0, 80.0),
                             InputVariable::integer("time_min", 5, 120),
                             InputVariable::categorical("catalyst", ["pd", "pt", "ni"])],
                        vec![Objective::maximize("yield"), Objective::minimize("cost")])?)
}

fn parse_observation(x: &str, y: &str) -> Result<NewObservation, Box<dyn Error>> {
    let x_raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(x.trim())?;
    let y: BTreeMap<String, f64> = serde_json::from_str(y.trim())?;
    Ok(NewObservation::new(x_raw, y))
}

fn show_and_decide(engine: &CampaignEngine, campaign_id: &Uuid) -> Result<(), Box<dyn Error>> {
    let iterations = engine.list_iterations(campaign_id)?;
    if iterations.is_empty() {
        println!("La campaña no tiene iteraciones");
        return Ok(());
    }
    for iteration in iterations.iter() {
        let decided = engine.get_decision(&iteration.id)?.is_some();
        println!("\nIteración {} ({}){}", iteration.index, iteration.id, if decided { " [decidida]" } else { "" });
        for proposal in engine.list_proposals(&iteration.id)? {
            println!("  propuesta {} estrategia={}", proposal.id, proposal.strategy_name);
            for (i, c) in proposal.candidates.iter().enumerate() {
                println!("    [{}] {}", i, serde_json::Value::Object(c.clone()));
            }
        }
    }
    let index = prompt("Índice de iteración a decidir (enter para ninguna): ")?;
    if index.trim().is_empty() {
        return Ok(());
    }
    let iteration = engine.get_iteration_by_index(campaign_id, index.trim().parse()?)?;
    let mut accepted = Vec::new();
    for proposal in engine.list_proposals(&iteration.id)? {
        let picked = prompt(&format!("Índices aceptados de {} (separados por comas): ", proposal.strategy_name))?;
        let indices = picked.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::parse::<usize>)
                            .collect::<Result<Vec<_>, _>>()?;
        if !indices.is_empty() {
            accepted.push(AcceptedCandidates { proposal_id: proposal.id, candidate_indices: indices });
        }
    }
    let decision = engine.decide(&iteration.id, accepted, None)?;
    println!("Decisión registrada: {}", decision.id);
    for cf in engine.get_counterfactuals(&iteration.id)? {
        println!("  no ejecutados de {}: {:?}", cf.strategy_name, cf.candidate_indices);
    }
    Ok(())
}

fn read_uuid(msg: &str) -> io::Result<Option<Uuid>> {
    let s = prompt(msg)?;
    match Uuid::parse_str(s.trim()) {
        Ok(u) => Ok(Some(u)),
        Err(_) => {
            eprintln!("UUID inválido");
            Ok(None)
        }
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_store::{InMemoryBlobStore, InMemoryCampaignStore};

    #[test]
    fn demo_process_runs_through_the_engine() {
        let engine = CampaignEngine::new(Arc::new(InMemoryCampaignStore::new()),
                                         Arc::new(InMemoryBlobStore::new()),
                                         Arc::new(CapabilityRegistry::with_builtins()),
                                         EngineConfig::default()).unwrap();
        let spec = engine.register_process(demo_process().unwrap()).unwrap();
        let campaign = engine.create_campaign(spec.id, "demo", None, None).unwrap();
        engine.start(&campaign.id).unwrap();

        let row = parse_observation(r#"{"temp": 40, "time_min": 30, "catalyst": "pt"}"#, r#"{"yield": 0.7, "cost": 12}"#).unwrap();
        let added = tokio_test::block_on(engine.add_observations(campaign.id, vec![row], "user")).unwrap();
        assert_eq!(added[0].x_encoded.len(), 5);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(parse_observation("{\"temp\": 40}", "[1, 2]").is_err());
        assert!(parse_observation("no-json", "{}").is_err());
    }
}
