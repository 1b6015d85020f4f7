use crate::errors::{EngineError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuración del motor. Se carga de variables `BOA_*` (tras leer un
/// `.env` si existe); cada clave tiene valor por defecto.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub database_url: String,
    pub artifacts_dir: PathBuf,
    pub workers: usize,
    pub worker_poll_interval: Duration,
    pub lock_wait: Duration,
    pub lease_ttl: Duration,
    /// Plazo por llamada a una capacidad; cada estrategia puede fijar el suyo.
    pub capability_deadline: Duration,
    pub checkpoint_keep_last: usize,
    pub default_batch_size: usize,
    /// Cada cuánto late un worker mientras tiene un job en ejecución.
    pub job_heartbeat_interval: Duration,
    /// Un job Running sin latidos durante este tiempo se da por huérfano.
    pub job_stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { database_url: "boa.db".into(),
                       artifacts_dir: PathBuf::from("./artifacts"),
                       workers: 2,
                       worker_poll_interval: Duration::from_millis(1000),
                       lock_wait: Duration::from_millis(5000),
                       lease_ttl: Duration::from_millis(300_000),
                       capability_deadline: Duration::from_millis(60_000),
                       checkpoint_keep_last: 5,
                       default_batch_size: 1,
                       job_heartbeat_interval: Duration::from_millis(5_000),
                       job_stale_after: Duration::from_millis(60_000) }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de claves arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let d = EngineConfig::default();
        let database_url = lookup("BOA_DATABASE_URL").or_else(|| lookup("DATABASE_URL")).unwrap_or(d.database_url);
        let artifacts_dir = lookup("BOA_ARTIFACTS_DIR").map(PathBuf::from).unwrap_or(d.artifacts_dir);
        let cfg = EngineConfig { database_url,
                                 artifacts_dir,
                                 workers: parse(&lookup, "BOA_WORKERS", d.workers)?,
                                 worker_poll_interval: millis(&lookup, "BOA_WORKER_POLL_INTERVAL_MS", d.worker_poll_interval)?,
                                 lock_wait: millis(&lookup, "BOA_LOCK_WAIT_MS", d.lock_wait)?,
                                 lease_ttl: millis(&lookup, "BOA_LEASE_TTL_MS", d.lease_ttl)?,
                                 capability_deadline: millis(&lookup, "BOA_CAPABILITY_DEADLINE_MS", d.capability_deadline)?,
                                 checkpoint_keep_last: parse(&lookup, "BOA_CHECKPOINT_KEEP_LAST", d.checkpoint_keep_last)?,
                                 default_batch_size: parse(&lookup, "BOA_DEFAULT_BATCH_SIZE", d.default_batch_size)?,
                                 job_heartbeat_interval: millis(&lookup, "BOA_JOB_HEARTBEAT_MS", d.job_heartbeat_interval)?,
                                 job_stale_after: millis(&lookup, "BOA_JOB_STALE_AFTER_MS", d.job_stale_after)? };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(EngineError::Validation("BOA_WORKERS debe ser al menos 1".into()));
        }
        if self.default_batch_size == 0 {
            return Err(EngineError::Validation("BOA_DEFAULT_BATCH_SIZE debe ser al menos 1".into()));
        }
        if self.lease_ttl.is_zero() {
            return Err(EngineError::Validation("BOA_LEASE_TTL_MS debe ser mayor que 0".into()));
        }
        let positive = [(self.worker_poll_interval, "BOA_WORKER_POLL_INTERVAL_MS"),
                        (self.lock_wait, "BOA_LOCK_WAIT_MS"),
                        (self.capability_deadline, "BOA_CAPABILITY_DEADLINE_MS"),
                        (self.job_heartbeat_interval, "BOA_JOB_HEARTBEAT_MS")];
        if let Some((_, key)) = positive.iter().find(|(d, _)| d.is_zero()) {
            return Err(EngineError::Validation(format!("{} debe ser mayor que 0", key)));
        }
        // Con menos de dos latidos de margen un job vivo parecería huérfano.
        if self.job_stale_after < self.job_heartbeat_interval * 2 {
            return Err(EngineError::Validation("BOA_JOB_STALE_AFTER_MS debe ser al menos el doble de BOA_JOB_HEARTBEAT_MS".into()));
        }
        if self.database_url.trim().is_empty() {
            return Err(EngineError::Validation("BOA_DATABASE_URL no puede estar vacía".into()));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
    where T: FromStr,
          F: Fn(&str) -> Option<String>
{
    match lookup(key) {
        Some(raw) => raw.trim()
                        .parse::<T>()
                        .map_err(|_| EngineError::Validation(format!("valor inválido para {}: {:?}", key, raw))),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
    where F: Fn(&str) -> Option<String>
{
    let ms = parse(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let cfg = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[("DATABASE_URL", "fallback.db"),
                                                          ("BOA_WORKERS", "4"),
                                                          ("BOA_LOCK_WAIT_MS", "250"),
                                                          ("BOA_CHECKPOINT_KEEP_LAST", "2")])).unwrap();
        assert_eq!(cfg.database_url, "fallback.db");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.lock_wait, Duration::from_millis(250));
        assert_eq!(cfg.checkpoint_keep_last, 2);

        let cfg = EngineConfig::from_lookup(lookup_from(&[("DATABASE_URL", "fallback.db"),
                                                          ("BOA_DATABASE_URL", "boa_main.db")])).unwrap();
        assert_eq!(cfg.database_url, "boa_main.db");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("BOA_WORKERS", "muchos")])).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(EngineConfig::from_lookup(lookup_from(&[("BOA_WORKERS", "0")])).is_err());
    }

    #[test]
    fn zero_waits_and_deadlines_are_rejected() {
        for key in ["BOA_CAPABILITY_DEADLINE_MS", "BOA_LOCK_WAIT_MS", "BOA_JOB_HEARTBEAT_MS"] {
            let err = EngineConfig::from_lookup(lookup_from(&[(key, "0")])).unwrap_err();
            assert!(err.to_string().contains(key), "{}: {}", key, err);
        }
    }

    #[test]
    fn stale_threshold_needs_room_for_heartbeats() {
        let err = EngineConfig::from_lookup(lookup_from(&[("BOA_JOB_HEARTBEAT_MS", "1000"),
                                                          ("BOA_JOB_STALE_AFTER_MS", "1500")])).unwrap_err();
        assert_eq!(err.kind(), "validation");
        let cfg = EngineConfig::from_lookup(lookup_from(&[("BOA_JOB_HEARTBEAT_MS", "1000"),
                                                          ("BOA_JOB_STALE_AFTER_MS", "2000")])).unwrap();
        assert_eq!(cfg.job_stale_after, Duration::from_secs(2));
    }
}
