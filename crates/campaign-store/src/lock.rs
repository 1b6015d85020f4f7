// Archivo: lock.rs
// Propósito: coordinador de locks de escritura por campaña basado en leases.
//
// El lease vive en el almacén (`LockRepository`); este módulo sólo añade la
// espera acotada y los avisos de liberación entre tareas del mismo proceso.
// Un lease expirado se considera abandonado y el siguiente solicitante lo
// toma. Cada lease lleva un `fence` que cambia con cada nuevo holder, así
// que una escritura hecha con un lease antiguo se rechaza con `LeaseLost`.
use crate::errors::{Result, StoreError};
use crate::repository::LockRepository;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Lease de escritura sobre una campaña.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub campaign_id: Uuid,
    /// Identidad del holder (p.ej. `job:<id>`).
    pub token: String,
    /// Identificador de esta concesión; se conserva al renovar.
    pub fence: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(campaign_id: Uuid, token: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self { campaign_id,
               token: token.to_string(),
               fence: Uuid::new_v4(),
               acquired_at: now,
               expires_at: now + ttl }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Decide el resultado de `try_acquire` a partir del lease guardado.
    /// Lo comparten todas las implementaciones de `LockRepository`.
    pub fn next_for(stored: Option<&Lease>,
                    campaign_id: Uuid,
                    token: &str,
                    ttl: Duration,
                    now: DateTime<Utc>)
                    -> Option<Lease> {
        match stored {
            Some(current) if !current.is_expired(now) => {
                if current.token == token {
                    let mut refreshed = current.clone();
                    refreshed.expires_at = now + ttl;
                    Some(refreshed)
                } else {
                    None
                }
            }
            _ => Some(Lease::new(campaign_id, token, ttl, now)),
        }
    }

    /// Comprueba que `self` siga siendo el lease vigente según el almacén.
    pub fn verify_against(&self, stored: Option<&Lease>, now: DateTime<Utc>) -> Result<()> {
        match stored {
            Some(current)
                if current.token == self.token && current.fence == self.fence && !current.is_expired(now) =>
            {
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(self.campaign_id)),
        }
    }
}

/// Exclusión mutua por campaña con expiración.
#[async_trait]
pub trait WriteLockCoordinator: Send + Sync {
    /// Espera hasta `timeout` a que el lock quede libre. `None` si venció
    /// el plazo sin conseguirlo.
    async fn acquire(&self, campaign_id: Uuid, token: &str, timeout: std::time::Duration) -> Result<Option<Lease>>;

    /// Idempotente: no hace nada si el token no coincide o ya se liberó.
    async fn release(&self, campaign_id: Uuid, token: &str) -> Result<()>;

    /// Re-validación optimista antes de confirmar resultados.
    async fn validate(&self, lease: &Lease) -> Result<bool>;

    /// Lease vigente, si lo hay. Los expirados se informan como libres.
    async fn is_locked(&self, campaign_id: Uuid) -> Result<Option<Lease>>;
}

/// Coordinador sobre un `LockRepository`. La espera combina avisos locales
/// (liberaciones en este proceso) con sondeo periódico (liberaciones de
/// otros procesos y expiraciones).
pub struct LeaseLockCoordinator<R: LockRepository + ?Sized> {
    repo: Arc<R>,
    ttl: Duration,
    poll_interval: std::time::Duration,
    waiters: DashMap<Uuid, Arc<Notify>>,
}

impl<R: LockRepository + ?Sized> LeaseLockCoordinator<R> {
    pub fn new(repo: Arc<R>, ttl: std::time::Duration) -> Self {
        Self { repo,
               ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(5)),
               poll_interval: std::time::Duration::from_millis(50),
               waiters: DashMap::new() }
    }

    pub fn with_poll_interval(mut self, poll_interval: std::time::Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn notifier(&self, campaign_id: Uuid) -> Arc<Notify> {
        self.waiters.entry(campaign_id).or_insert_with(|| Arc::new(Notify::new())).clone()
    }
}

#[async_trait]
impl<R: LockRepository + ?Sized + 'static> WriteLockCoordinator for LeaseLockCoordinator<R> {
    async fn acquire(&self, campaign_id: Uuid, token: &str, timeout: std::time::Duration) -> Result<Option<Lease>> {
        let deadline = Instant::now() + timeout;
        let notify = self.notifier(campaign_id);
        loop {
            // Registrar interés antes de intentar para no perder un aviso
            // emitido entre el intento y la espera.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Utc::now();
            if let Some(lease) = self.repo.try_acquire_lease(&campaign_id, token, self.ttl, now)? {
                log::debug!("lock adquirido campaign={} token={}", campaign_id, token);
                return Ok(Some(lease));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::info!("lock ocupado campaign={} token={}: plazo agotado", campaign_id, token);
                return Ok(None);
            }
            let mut wait = remaining.min(self.poll_interval);
            if let Some(current) = self.repo.get_lease(&campaign_id)? {
                if let Ok(until_expiry) = (current.expires_at - now).to_std() {
                    wait = wait.min(until_expiry.max(std::time::Duration::from_millis(1)));
                }
            }
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn release(&self, campaign_id: Uuid, token: &str) -> Result<()> {
        if self.repo.release_lease(&campaign_id, token)? {
            log::debug!("lock liberado campaign={} token={}", campaign_id, token);
            self.notifier(campaign_id).notify_waiters();
        }
        Ok(())
    }

    async fn validate(&self, lease: &Lease) -> Result<bool> {
        let stored = self.repo.get_lease(&lease.campaign_id)?;
        Ok(lease.verify_against(stored.as_ref(), Utc::now()).is_ok())
    }

    async fn is_locked(&self, campaign_id: Uuid) -> Result<Option<Lease>> {
        let now = Utc::now();
        Ok(self.repo.get_lease(&campaign_id)?.filter(|l| !l.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_lease_is_taken_by_next_holder() {
        let c = Uuid::new_v4();
        let now = Utc::now();
        let old = Lease::new(c, "a", Duration::seconds(1), now - Duration::seconds(5));
        let next = Lease::next_for(Some(&old), c, "b", Duration::seconds(10), now).unwrap();
        assert_eq!(next.token, "b");
        assert_ne!(next.fence, old.fence);
        assert!(old.verify_against(Some(&next), now).is_err());
    }

    #[test]
    fn same_token_refreshes_and_keeps_fence() {
        let c = Uuid::new_v4();
        let now = Utc::now();
        let held = Lease::new(c, "a", Duration::seconds(1), now);
        let refreshed = Lease::next_for(Some(&held), c, "a", Duration::seconds(30), now).unwrap();
        assert_eq!(refreshed.fence, held.fence);
        assert!(refreshed.expires_at > held.expires_at);
        assert!(Lease::next_for(Some(&held), c, "b", Duration::seconds(30), now).is_none());
    }
}
