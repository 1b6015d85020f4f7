// Repositorio Diesel que implementa todos los traits de `campaign-store`.
// Las escrituras con varias filas o con lease van en una sola transacción;
// en SQLite se usa `BEGIN IMMEDIATE` para serializar escritores.
use crate::rows::*;
use crate::schema::{campaign_leases, campaigns, checkpoints, decisions, iterations, jobs, observations, processes,
                    proposals};
use campaign_domain::{Campaign, CampaignStatus, Checkpoint, Decision, DomainError, Iteration, Job, JobFilter, JobStatus,
                      NewProposal, Observation, ProcessSpec, Proposal};
use campaign_store::{CampaignRepository, CheckpointRepository, JobRepository, Lease, LedgerRepository, LockRepository,
                     ObservationRepository, ProcessRepository, Result, StoreError};
use chrono::{DateTime, Duration, Utc};
#[cfg_attr(feature = "pg", allow(unused_imports))]
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[cfg(feature = "pg")]
pub(crate) type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
pub(crate) type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;

/// Error interno de las transacciones: Diesel necesita `From<DieselError>`
/// en el tipo de error del closure.
#[derive(Debug)]
enum TxError {
  Db(DieselError),
  Store(StoreError),
}

impl From<DieselError> for TxError {
  fn from(e: DieselError) -> Self {
    TxError::Db(e)
  }
}

impl From<StoreError> for TxError {
  fn from(e: StoreError) -> Self {
    TxError::Store(e)
  }
}

impl From<DomainError> for TxError {
  fn from(e: DomainError) -> Self {
    TxError::Store(StoreError::Domain(e))
  }
}

impl From<TxError> for StoreError {
  fn from(e: TxError) -> Self {
    match e {
      TxError::Db(e) => db_err(e),
      TxError::Store(e) => e,
    }
  }
}

fn db_err(e: DieselError) -> StoreError {
  match e {
    DieselError::NotFound => StoreError::NotFound("registro".into()),
    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => StoreError::Conflict(info.message().to_string()),
    other => StoreError::Storage(format!("db: {}", other)),
  }
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(db_err)
}

/// Ajustes por conexión. `busy_timeout` es por conexión en SQLite, así que
/// se aplica cada vez que el pool abre una.
#[derive(Debug, Clone, Copy)]
struct ConnectionSetup;

impl CustomizeConnection<DbConn, diesel::r2d2::Error> for ConnectionSetup {
  #[cfg(not(feature = "pg"))]
  fn on_acquire(&self, conn: &mut DbConn) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }

  #[cfg(feature = "pg")]
  fn on_acquire(&self, _conn: &mut DbConn) -> std::result::Result<(), diesel::r2d2::Error> {
    Ok(())
  }
}

/// Almacén durable del motor sobre Diesel (SQLite por defecto, Postgres con
/// la feature `pg`).
#[derive(Clone)]
pub struct DieselCampaignStore {
  pool: Arc<DbPool>,
}

impl DieselCampaignStore {
  /// Abre el pool, aplica los ajustes de conexión y ejecuta las migraciones
  /// pendientes.
  pub fn new(database_url: &str) -> Result<Self> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let pool = Pool::builder().max_size(4)
                              .connection_customizer(Box::new(ConnectionSetup))
                              .build(manager)
                              .map_err(|e| StoreError::Storage(format!("pool: {}", e)))?;
    let store = DieselCampaignStore { pool: Arc::new(pool) };
    let mut c = store.conn()?;
    #[cfg(not(feature = "pg"))]
    {
      // WAL es persistente en el fichero; basta con fijarlo una vez. Las
      // bases en memoria lo rechazan y siguen en modo normal.
      let _ = c.batch_execute("PRAGMA journal_mode = WAL;");
    }
    c.run_pending_migrations(MIGRATIONS).map_err(|e| StoreError::Storage(format!("migraciones: {}", e)))?;
    log::info!("almacén diesel listo ({})", database_url);
    Ok(store)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>> {
    self.pool.get().map_err(|e| StoreError::Storage(format!("pool: {}", e)))
  }

  /// Ejecuta `f` en una transacción de escritura.
  fn write_tx<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut DbConn) -> std::result::Result<T, TxError>
  {
    let mut conn = self.conn()?;
    #[cfg(not(feature = "pg"))]
    let res = conn.immediate_transaction(f);
    #[cfg(feature = "pg")]
    let res = conn.build_transaction().read_write().run(f);
    res.map_err(StoreError::from)
  }
}

fn require_campaign(conn: &mut DbConn, campaign_id: &Uuid) -> std::result::Result<(), TxError> {
  let n: i64 = campaigns::table.filter(campaigns::id.eq(campaign_id.to_string())).count().get_result(conn)?;
  if n == 0 {
    return Err(StoreError::NotFound(format!("campaign {}", campaign_id)).into());
  }
  Ok(())
}

fn require_iteration(conn: &mut DbConn, iteration_id: &Uuid) -> std::result::Result<(), TxError> {
  let n: i64 = iterations::table.filter(iterations::id.eq(iteration_id.to_string())).count().get_result(conn)?;
  if n == 0 {
    return Err(StoreError::NotFound(format!("iteration {}", iteration_id)).into());
  }
  Ok(())
}

fn load_lease(conn: &mut DbConn, campaign_id: &Uuid) -> std::result::Result<Option<Lease>, TxError> {
  let query = campaign_leases::table.filter(campaign_leases::campaign_id.eq(campaign_id.to_string()));
  #[cfg(feature = "pg")]
  let row = query.for_update().first::<LeaseRow>(conn).optional()?;
  #[cfg(not(feature = "pg"))]
  let row = query.first::<LeaseRow>(conn).optional()?;
  Ok(row.map(LeaseRow::into_domain).transpose()?)
}

/// Re-valida el lease dentro de la transacción de escritura.
fn check_fence(conn: &mut DbConn, campaign_id: &Uuid, fence: Option<&Lease>) -> std::result::Result<(), TxError> {
  if let Some(lease) = fence {
    if &lease.campaign_id != campaign_id {
      return Err(StoreError::LeaseLost(*campaign_id).into());
    }
    let stored = load_lease(conn, campaign_id)?;
    lease.verify_against(stored.as_ref(), Utc::now())?;
  }
  Ok(())
}

fn load_job(conn: &mut DbConn, job_id: &Uuid) -> std::result::Result<Job, TxError> {
  let row = jobs::table.filter(jobs::id.eq(job_id.to_string()))
                       .first::<JobRow>(conn)
                       .optional()?
                       .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
  Ok(row.into_domain()?)
}

/// Persiste los campos mutables de un job ya transicionado en memoria.
/// Sólo escribe si el estado guardado sigue siendo `expected`.
fn store_job_state(conn: &mut DbConn, job: &Job, expected: JobStatus) -> std::result::Result<usize, TxError> {
  let row = JobRow::from_domain(job)?;
  let n = diesel::update(jobs::table.filter(jobs::id.eq(&row.id)).filter(jobs::status.eq(expected.as_str())))
    .set((jobs::status.eq(&row.status),
          jobs::result.eq(&row.result),
          jobs::error.eq(&row.error),
          jobs::started_at_ts.eq(row.started_at_ts),
          jobs::completed_at_ts.eq(row.completed_at_ts),
          jobs::worker_id.eq(&row.worker_id),
          jobs::heartbeat_at_ts.eq(row.heartbeat_at_ts),
          jobs::progress.eq(row.progress)))
    .execute(conn)?;
  Ok(n)
}

impl ProcessRepository for DieselCampaignStore {
  fn insert_process(&self, spec: &ProcessSpec) -> Result<()> {
    let row = ProcessRow::from_domain(spec)?;
    let mut conn = self.conn()?;
    map_db_err(diesel::insert_into(processes::table).values(&row).execute(&mut conn))?;
    Ok(())
  }

  fn get_process(&self, process_id: &Uuid) -> Result<ProcessSpec> {
    let mut conn = self.conn()?;
    map_db_err(processes::table.filter(processes::id.eq(process_id.to_string()))
                               .first::<ProcessRow>(&mut conn)
                               .optional())?
      .ok_or_else(|| StoreError::NotFound(format!("process {}", process_id)))?
      .into_domain()
  }

  fn list_processes(&self) -> Result<Vec<ProcessSpec>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(processes::table.order((processes::created_at_ts.asc(), processes::id.asc()))
                                          .load::<ProcessRow>(&mut conn))?;
    rows.into_iter().map(ProcessRow::into_domain).collect()
  }
}

impl CampaignRepository for DieselCampaignStore {
  fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
    let row = CampaignRow::from_domain(campaign)?;
    self.write_tx(|conn| {
          let n: i64 = processes::table.filter(processes::id.eq(&row.process_id)).count().get_result(conn)?;
          if n == 0 {
            return Err(StoreError::NotFound(format!("process {}", campaign.process_id)).into());
          }
          diesel::insert_into(campaigns::table).values(&row).execute(conn)?;
          Ok(())
        })
  }

  fn get_campaign(&self, campaign_id: &Uuid) -> Result<Campaign> {
    let mut conn = self.conn()?;
    map_db_err(campaigns::table.filter(campaigns::id.eq(campaign_id.to_string()))
                               .first::<CampaignRow>(&mut conn)
                               .optional())?
      .ok_or_else(|| StoreError::NotFound(format!("campaign {}", campaign_id)))?
      .into_domain()
  }

  fn list_campaigns(&self) -> Result<Vec<Campaign>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(campaigns::table.order((campaigns::created_at_ts.asc(), campaigns::id.asc()))
                                          .load::<CampaignRow>(&mut conn))?;
    rows.into_iter().map(CampaignRow::into_domain).collect()
  }

  fn update_campaign_status(&self,
                            campaign_id: &Uuid,
                            expected: CampaignStatus,
                            next: CampaignStatus,
                            now: DateTime<Utc>)
                            -> Result<Option<Campaign>> {
    let id_s = campaign_id.to_string();
    let updated = self.write_tx(|conn| {
                        require_campaign(conn, campaign_id)?;
                        let n = diesel::update(campaigns::table.filter(campaigns::id.eq(&id_s))
                                                               .filter(campaigns::status.eq(expected.as_str())))
                          .set((campaigns::status.eq(next.as_str()), campaigns::updated_at_ts.eq(ts(&now))))
                          .execute(conn)?;
                        Ok(n)
                      })?;
    if updated == 0 {
      return Ok(None);
    }
    self.get_campaign(campaign_id).map(Some)
  }
}

impl ObservationRepository for DieselCampaignStore {
  fn append_observations(&self, campaign_id: &Uuid, observations: &[Observation], fence: Option<&Lease>) -> Result<()> {
    let id_s = campaign_id.to_string();
    self.write_tx(|conn| {
          require_campaign(conn, campaign_id)?;
          check_fence(conn, campaign_id, fence)?;
          let last: Option<i64> = observations::table.filter(observations::campaign_id.eq(&id_s))
                                                     .select(diesel::dsl::max(observations::seq))
                                                     .first(conn)?;
          let mut seq = last.map(|s| s + 1).unwrap_or(0);
          for o in observations {
            let row = ObservationRow::from_domain(o, seq)?;
            diesel::insert_into(observations::table).values(&row).execute(conn)?;
            seq += 1;
          }
          Ok(())
        })
  }

  fn list_observations(&self, campaign_id: &Uuid) -> Result<Vec<Observation>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(observations::table.filter(observations::campaign_id.eq(campaign_id.to_string()))
                                             .order(observations::seq.asc())
                                             .load::<ObservationRow>(&mut conn))?;
    rows.into_iter().map(ObservationRow::into_domain).collect()
  }

  fn count_observations(&self, campaign_id: &Uuid) -> Result<usize> {
    let mut conn = self.conn()?;
    let n: i64 = map_db_err(observations::table.filter(observations::campaign_id.eq(campaign_id.to_string()))
                                               .count()
                                               .get_result(&mut conn))?;
    Ok(n as usize)
  }
}

impl LedgerRepository for DieselCampaignStore {
  fn append_iteration(&self,
                      campaign_id: &Uuid,
                      dataset_hash: &str,
                      metadata: JsonValue,
                      proposals: Vec<NewProposal>,
                      fence: Option<&Lease>)
                      -> Result<(Iteration, Vec<Proposal>)> {
    let mut names: Vec<&str> = proposals.iter().map(|p| p.strategy_name.as_str()).collect();
    names.sort_unstable();
    if names.windows(2).any(|w| w[0] == w[1]) {
      return Err(DomainError::ValidationError("estrategia repetida en la misma iteración".into()).into());
    }
    let id_s = campaign_id.to_string();
    self.write_tx(|conn| {
          require_campaign(conn, campaign_id)?;
          check_fence(conn, campaign_id, fence)?;
          let last: Option<i64> = iterations::table.filter(iterations::campaign_id.eq(&id_s))
                                                   .select(diesel::dsl::max(iterations::idx))
                                                   .first(conn)?;
          let iteration = Iteration { id: Uuid::new_v4(),
                                      campaign_id: *campaign_id,
                                      index: last.map(|i| i + 1).unwrap_or(0),
                                      dataset_hash: dataset_hash.to_string(),
                                      metadata,
                                      created_at: Utc::now() };
          diesel::insert_into(iterations::table).values(&IterationRow::from_domain(&iteration)?).execute(conn)?;
          let mut stored = Vec::with_capacity(proposals.len());
          for (seq, p) in proposals.into_iter().enumerate() {
            let proposal = p.into_proposal(iteration.id);
            diesel::insert_into(proposals::table).values(&ProposalRow::from_domain(&proposal, seq as i64)?)
                                                 .execute(conn)?;
            stored.push(proposal);
          }
          Ok((iteration, stored))
        })
  }

  fn insert_proposal(&self, iteration_id: &Uuid, proposal: NewProposal) -> Result<Proposal> {
    let it_s = iteration_id.to_string();
    self.write_tx(|conn| {
          require_iteration(conn, iteration_id)?;
          let dup: i64 = proposals::table.filter(proposals::iteration_id.eq(&it_s))
                                         .filter(proposals::strategy_name.eq(&proposal.strategy_name))
                                         .count()
                                         .get_result(conn)?;
          if dup > 0 {
            return Err(StoreError::Conflict(format!("la estrategia {} ya tiene propuesta en la iteración {}",
                                                    proposal.strategy_name, iteration_id)).into());
          }
          let last: Option<i64> = proposals::table.filter(proposals::iteration_id.eq(&it_s))
                                                  .select(diesel::dsl::max(proposals::seq))
                                                  .first(conn)?;
          let stored = proposal.into_proposal(*iteration_id);
          let row = ProposalRow::from_domain(&stored, last.map(|s| s + 1).unwrap_or(0))?;
          diesel::insert_into(proposals::table).values(&row).execute(conn)?;
          Ok(stored)
        })
  }

  fn get_iteration(&self, iteration_id: &Uuid) -> Result<Iteration> {
    let mut conn = self.conn()?;
    map_db_err(iterations::table.filter(iterations::id.eq(iteration_id.to_string()))
                                .first::<IterationRow>(&mut conn)
                                .optional())?
      .ok_or_else(|| StoreError::NotFound(format!("iteration {}", iteration_id)))?
      .into_domain()
  }

  fn get_iteration_by_index(&self, campaign_id: &Uuid, index: i64) -> Result<Iteration> {
    let mut conn = self.conn()?;
    map_db_err(iterations::table.filter(iterations::campaign_id.eq(campaign_id.to_string()))
                                .filter(iterations::idx.eq(index))
                                .first::<IterationRow>(&mut conn)
                                .optional())?
      .ok_or_else(|| StoreError::NotFound(format!("iteration {} de la campaña {}", index, campaign_id)))?
      .into_domain()
  }

  fn list_iterations(&self, campaign_id: &Uuid) -> Result<Vec<Iteration>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(iterations::table.filter(iterations::campaign_id.eq(campaign_id.to_string()))
                                           .order(iterations::idx.asc())
                                           .load::<IterationRow>(&mut conn))?;
    rows.into_iter().map(IterationRow::into_domain).collect()
  }

  fn latest_iteration(&self, campaign_id: &Uuid) -> Result<Option<Iteration>> {
    let mut conn = self.conn()?;
    map_db_err(iterations::table.filter(iterations::campaign_id.eq(campaign_id.to_string()))
                                .order(iterations::idx.desc())
                                .first::<IterationRow>(&mut conn)
                                .optional())?
      .map(IterationRow::into_domain)
      .transpose()
  }

  fn get_proposal(&self, proposal_id: &Uuid) -> Result<Proposal> {
    let mut conn = self.conn()?;
    map_db_err(proposals::table.filter(proposals::id.eq(proposal_id.to_string()))
                               .first::<ProposalRow>(&mut conn)
                               .optional())?
      .ok_or_else(|| StoreError::NotFound(format!("proposal {}", proposal_id)))?
      .into_domain()
  }

  fn list_proposals(&self, iteration_id: &Uuid) -> Result<Vec<Proposal>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(proposals::table.filter(proposals::iteration_id.eq(iteration_id.to_string()))
                                          .order(proposals::seq.asc())
                                          .load::<ProposalRow>(&mut conn))?;
    rows.into_iter().map(ProposalRow::into_domain).collect()
  }

  fn insert_decision(&self, decision: &Decision) -> Result<()> {
    let row = DecisionRow::from_domain(decision)?;
    let res = self.write_tx(|conn| {
                    require_iteration(conn, &decision.iteration_id)?;
                    let existing: i64 = decisions::table.filter(decisions::iteration_id.eq(&row.iteration_id))
                                                        .count()
                                                        .get_result(conn)?;
                    if existing > 0 {
                      return Err(StoreError::DuplicateDecision(decision.iteration_id).into());
                    }
                    diesel::insert_into(decisions::table).values(&row).execute(conn)?;
                    Ok(())
                  });
    // En Postgres dos escritores pueden pasar la comprobación; la
    // restricción UNIQUE decide.
    match res {
      Err(StoreError::Conflict(_)) => Err(StoreError::DuplicateDecision(decision.iteration_id)),
      other => other,
    }
  }

  fn get_decision(&self, iteration_id: &Uuid) -> Result<Option<Decision>> {
    let mut conn = self.conn()?;
    map_db_err(decisions::table.filter(decisions::iteration_id.eq(iteration_id.to_string()))
                               .first::<DecisionRow>(&mut conn)
                               .optional())?
      .map(DecisionRow::into_domain)
      .transpose()
  }
}

impl JobRepository for DieselCampaignStore {
  fn insert_job(&self, job: &Job) -> Result<()> {
    let row = JobRow::from_domain(job)?;
    let mut conn = self.conn()?;
    map_db_err(diesel::insert_into(jobs::table).values(&row).execute(&mut conn))?;
    Ok(())
  }

  fn get_job(&self, job_id: &Uuid) -> Result<Job> {
    let mut conn = self.conn()?;
    load_job(&mut conn, job_id).map_err(StoreError::from)
  }

  fn dequeue_next(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
    self.write_tx(|conn| {
          let query = jobs::table.filter(jobs::status.eq(JobStatus::Pending.as_str()))
                                 .order((jobs::created_at_ts.asc(), jobs::id.asc()));
          #[cfg(feature = "pg")]
          let row = query.for_update().skip_locked().first::<JobRow>(conn).optional()?;
          #[cfg(not(feature = "pg"))]
          let row = query.first::<JobRow>(conn).optional()?;
          let Some(row) = row else {
            return Ok(None);
          };
          let mut job = row.into_domain()?;
          job.claim(owner, now)?;
          // El filtro por estado hace de compare-and-swap.
          if store_job_state(conn, &job, JobStatus::Pending)? == 0 {
            return Ok(None);
          }
          Ok(Some(job))
        })
  }

  fn heartbeat_job(&self, job_id: &Uuid, owner: &str, progress: Option<f64>, now: DateTime<Utc>) -> Result<bool> {
    self.write_tx(|conn| {
          let mut job = load_job(conn, job_id)?;
          if !job.beat(owner, progress, now) {
            return Ok(false);
          }
          Ok(store_job_state(conn, &job, JobStatus::Running)? == 1)
        })
  }

  fn finish_job(&self,
                job_id: &Uuid,
                owner: &str,
                next: JobStatus,
                result: Option<JsonValue>,
                error: Option<String>,
                now: DateTime<Utc>)
                -> Result<Option<Job>> {
    self.write_tx(|conn| {
          let mut job = load_job(conn, job_id)?;
          if !job.is_owned_by(owner) {
            return Ok(None);
          }
          job.transition(next, result, error, now)?;
          if store_job_state(conn, &job, JobStatus::Running)? == 0 {
            return Ok(None);
          }
          Ok(Some(job))
        })
  }

  fn transition_job(&self,
                    job_id: &Uuid,
                    next: JobStatus,
                    result: Option<JsonValue>,
                    error: Option<String>,
                    now: DateTime<Utc>)
                    -> Result<Job> {
    self.write_tx(|conn| {
          let mut job = load_job(conn, job_id)?;
          let previous = job.status;
          job.transition(next, result, error, now)?;
          if store_job_state(conn, &job, previous)? == 0 {
            return Err(StoreError::Conflict(format!("job {} cambió de estado concurrentemente", job_id)).into());
          }
          Ok(job)
        })
  }

  fn cancel_job(&self, job_id: &Uuid, now: DateTime<Utc>) -> Result<Job> {
    self.write_tx(|conn| {
          let mut job = load_job(conn, job_id)?;
          match job.status {
            JobStatus::Pending => {
              job.transition(JobStatus::Cancelled, None, None, now)?;
              if store_job_state(conn, &job, JobStatus::Pending)? == 0 {
                return Err(StoreError::JobAlreadyRunning(*job_id).into());
              }
              Ok(job)
            }
            JobStatus::Running => Err(StoreError::JobAlreadyRunning(*job_id).into()),
            _ => Ok(job),
          }
        })
  }

  fn list_jobs(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<Vec<Job>> {
    let mut conn = self.conn()?;
    let mut query = jobs::table.into_boxed();
    if let Some(c) = filter.campaign_id {
      query = query.filter(jobs::campaign_id.eq(c.to_string()));
    }
    if let Some(s) = filter.status {
      query = query.filter(jobs::status.eq(s.as_str()));
    }
    if let Some(t) = filter.job_type {
      query = query.filter(jobs::job_type.eq(t.to_string()));
    }
    let rows = map_db_err(query.order((jobs::created_at_ts.desc(), jobs::id.desc()))
                               .limit(limit.min(i64::MAX as usize) as i64)
                               .offset(offset as i64)
                               .load::<JobRow>(&mut conn))?;
    rows.into_iter().map(JobRow::into_domain).collect()
  }

  fn count_jobs(&self, status: Option<JobStatus>, campaign_id: Option<Uuid>) -> Result<usize> {
    let mut conn = self.conn()?;
    let mut query = jobs::table.into_boxed();
    if let Some(c) = campaign_id {
      query = query.filter(jobs::campaign_id.eq(c.to_string()));
    }
    if let Some(s) = status {
      query = query.filter(jobs::status.eq(s.as_str()));
    }
    let n: i64 = map_db_err(query.count().get_result(&mut conn))?;
    Ok(n as usize)
  }

  fn mark_orphans_failed(&self,
                         stale_before: DateTime<Utc>,
                         error: &str,
                         result: JsonValue,
                         now: DateTime<Utc>)
                         -> Result<Vec<Job>> {
    self.write_tx(|conn| {
          let rows = jobs::table.filter(jobs::status.eq(JobStatus::Running.as_str())).load::<JobRow>(conn)?;
          let mut failed = Vec::new();
          for row in rows {
            let mut job = row.into_domain()?;
            if !job.is_stale(stale_before) {
              continue;
            }
            job.transition(JobStatus::Failed, Some(result.clone()), Some(error.to_string()), now)?;
            store_job_state(conn, &job, JobStatus::Running)?;
            failed.push(job);
          }
          Ok(failed)
        })
  }

  fn cleanup_finished(&self, keep_last: usize) -> Result<usize> {
    let terminal = [JobStatus::Completed.as_str(), JobStatus::Failed.as_str(), JobStatus::Cancelled.as_str()];
    self.write_tx(|conn| {
          let rows: Vec<(String, i64, Option<i64>)> =
            jobs::table.filter(jobs::status.eq_any(terminal))
                       .select((jobs::id, jobs::created_at_ts, jobs::completed_at_ts))
                       .load(conn)?;
          let mut finished: Vec<(i64, String)> =
            rows.into_iter().map(|(id, created, completed)| (completed.unwrap_or(created), id)).collect();
          finished.sort_by(|a, b| b.cmp(a));
          let doomed: Vec<String> = finished.into_iter().skip(keep_last).map(|(_, id)| id).collect();
          if doomed.is_empty() {
            return Ok(0);
          }
          let n = diesel::delete(jobs::table.filter(jobs::id.eq_any(&doomed))).execute(conn)?;
          Ok(n)
        })
  }
}

impl CheckpointRepository for DieselCampaignStore {
  fn insert_checkpoint(&self, checkpoint: &Checkpoint, fence: Option<&Lease>) -> Result<()> {
    let id_s = checkpoint.campaign_id.to_string();
    self.write_tx(|conn| {
          require_campaign(conn, &checkpoint.campaign_id)?;
          check_fence(conn, &checkpoint.campaign_id, fence)?;
          let last: Option<i64> = checkpoints::table.filter(checkpoints::campaign_id.eq(&id_s))
                                                    .select(diesel::dsl::max(checkpoints::seq))
                                                    .first(conn)?;
          let row = CheckpointRow::from_domain(checkpoint, last.map(|s| s + 1).unwrap_or(0))?;
          diesel::insert_into(checkpoints::table).values(&row).execute(conn)?;
          Ok(())
        })
  }

  fn list_checkpoints(&self, campaign_id: &Uuid) -> Result<Vec<Checkpoint>> {
    let mut conn = self.conn()?;
    let rows = map_db_err(checkpoints::table.filter(checkpoints::campaign_id.eq(campaign_id.to_string()))
                                            .order(checkpoints::seq.desc())
                                            .load::<CheckpointRow>(&mut conn))?;
    rows.into_iter().map(CheckpointRow::into_domain).collect()
  }

  fn latest_checkpoint(&self, campaign_id: &Uuid) -> Result<Option<Checkpoint>> {
    let mut conn = self.conn()?;
    map_db_err(checkpoints::table.filter(checkpoints::campaign_id.eq(campaign_id.to_string()))
                                 .order(checkpoints::seq.desc())
                                 .first::<CheckpointRow>(&mut conn)
                                 .optional())?
      .map(CheckpointRow::into_domain)
      .transpose()
  }

  fn checkpoint_for_iteration(&self, campaign_id: &Uuid, iteration_id: &Uuid) -> Result<Option<Checkpoint>> {
    let mut conn = self.conn()?;
    map_db_err(checkpoints::table.filter(checkpoints::campaign_id.eq(campaign_id.to_string()))
                                 .filter(checkpoints::iteration_id.eq(iteration_id.to_string()))
                                 .order(checkpoints::seq.desc())
                                 .first::<CheckpointRow>(&mut conn)
                                 .optional())?
      .map(CheckpointRow::into_domain)
      .transpose()
  }

  fn delete_checkpoint(&self, checkpoint_id: &Uuid) -> Result<()> {
    let mut conn = self.conn()?;
    let n = map_db_err(diesel::delete(checkpoints::table.filter(checkpoints::id.eq(checkpoint_id.to_string())))
                         .execute(&mut conn))?;
    if n == 0 {
      return Err(StoreError::NotFound(format!("checkpoint {}", checkpoint_id)));
    }
    Ok(())
  }
}

impl LockRepository for DieselCampaignStore {
  fn try_acquire_lease(&self, campaign_id: &Uuid, token: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Option<Lease>> {
    let res = self.write_tx(|conn| {
                    let stored = load_lease(conn, campaign_id)?;
                    let Some(next) = Lease::next_for(stored.as_ref(), *campaign_id, token, ttl, now) else {
                      return Ok(None);
                    };
                    let row = LeaseRow::from_domain(&next);
                    if stored.is_some() {
                      diesel::update(campaign_leases::table.filter(campaign_leases::campaign_id.eq(&row.campaign_id)))
                        .set((campaign_leases::token.eq(&row.token),
                              campaign_leases::fence.eq(&row.fence),
                              campaign_leases::acquired_at_ts.eq(row.acquired_at_ts),
                              campaign_leases::expires_at_ts.eq(row.expires_at_ts)))
                        .execute(conn)?;
                    } else {
                      diesel::insert_into(campaign_leases::table).values(&row).execute(conn)?;
                    }
                    Ok(Some(next))
                  });
    // Dos primeros holders simultáneos: el que pierde el INSERT no tiene lock.
    match res {
      Err(StoreError::Conflict(_)) => Ok(None),
      other => other,
    }
  }

  fn release_lease(&self, campaign_id: &Uuid, token: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let n = map_db_err(diesel::delete(campaign_leases::table.filter(campaign_leases::campaign_id.eq(campaign_id.to_string()))
                                                            .filter(campaign_leases::token.eq(token)))
                         .execute(&mut conn))?;
    Ok(n > 0)
  }

  fn get_lease(&self, campaign_id: &Uuid) -> Result<Option<Lease>> {
    let mut conn = self.conn()?;
    map_db_err(campaign_leases::table.filter(campaign_leases::campaign_id.eq(campaign_id.to_string()))
                                     .first::<LeaseRow>(&mut conn)
                                     .optional())?
      .map(LeaseRow::into_domain)
      .transpose()
  }
}
