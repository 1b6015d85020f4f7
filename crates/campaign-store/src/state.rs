// Archivo: state.rs
// Propósito: controlador del ciclo de vida de campañas. Toda transición
// pasa por la tabla de `CampaignTransition` y se aplica con compare-and-swap
// en el almacén.
use crate::errors::{Result, StoreError};
use crate::repository::{CampaignRepository, ProcessRepository};
use campaign_domain::{Campaign, CampaignStatus, CampaignTransition, DomainError};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Reintentos de CAS antes de rendirse ante escritores concurrentes.
const MAX_CAS_ATTEMPTS: usize = 8;

pub struct CampaignStateController<R: CampaignRepository + ProcessRepository + ?Sized> {
    repo: Arc<R>,
}

impl<R: CampaignRepository + ProcessRepository + ?Sized> Clone for CampaignStateController<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

impl<R: CampaignRepository + ProcessRepository + ?Sized> CampaignStateController<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Persiste una campaña nueva en estado Created.
    pub fn create(&self, campaign: Campaign) -> Result<Campaign> {
        if campaign.status != CampaignStatus::Created {
            return Err(StoreError::Domain(DomainError::ValidationError("una campaña nueva debe estar en estado created".into())));
        }
        self.repo.get_process(&campaign.process_id)?;
        self.repo.insert_campaign(&campaign)?;
        log::info!("campaña creada id={} nombre={}", campaign.id, campaign.name);
        Ok(campaign)
    }

    pub fn get(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.repo.get_campaign(campaign_id)
    }

    pub fn list(&self) -> Result<Vec<Campaign>> {
        self.repo.list_campaigns()
    }

    /// Aplica una transición. Las ilegales fallan con
    /// `InvalidStateTransition{from, to}`.
    pub fn transition(&self, campaign_id: &Uuid, transition: CampaignTransition) -> Result<Campaign> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.repo.get_campaign(campaign_id)?;
            let next = transition.apply(current.status)?;
            if let Some(updated) = self.repo.update_campaign_status(campaign_id, current.status, next, Utc::now())? {
                log::info!("campaña {}: {} -> {}", campaign_id, current.status, next);
                return Ok(updated);
            }
        }
        Err(StoreError::Conflict(format!("transición concurrente sobre la campaña {}", campaign_id)))
    }

    pub fn start(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Start)
    }

    pub fn pause(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Pause)
    }

    pub fn resume(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Resume)
    }

    pub fn complete(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Complete)
    }

    pub fn archive(&self, campaign_id: &Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignTransition::Archive)
    }

    /// Devuelve la campaña si está Active; si no, `CampaignNotActive`.
    pub fn require_active(&self, campaign_id: &Uuid) -> Result<Campaign> {
        let campaign = self.repo.get_campaign(campaign_id)?;
        campaign.ensure_active()?;
        Ok(campaign)
    }
}
