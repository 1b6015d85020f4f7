mod common;

use campaign_domain::{Campaign, CampaignStatus, DomainError};
use campaign_store::{CampaignStateController, StoreError};
use indexmap::IndexMap;

#[test]
fn full_lifecycle_and_illegal_start_from_paused() {
  let (store, campaign) = common::store_with_campaign();
  let ctl = CampaignStateController::new(store);

  assert_eq!(ctl.start(&campaign.id).unwrap().status, CampaignStatus::Active);
  assert_eq!(ctl.pause(&campaign.id).unwrap().status, CampaignStatus::Paused);
  let err = ctl.start(&campaign.id).unwrap_err();
  assert!(matches!(err,
                   StoreError::Domain(DomainError::InvalidStateTransition { from: CampaignStatus::Paused,
                                                                            to: CampaignStatus::Active })));
  assert_eq!(ctl.resume(&campaign.id).unwrap().status, CampaignStatus::Active);
  assert_eq!(ctl.complete(&campaign.id).unwrap().status, CampaignStatus::Completed);
  assert_eq!(ctl.archive(&campaign.id).unwrap().status, CampaignStatus::Archived);
  assert!(ctl.resume(&campaign.id).is_err());
}

#[test]
fn require_active_reports_current_status() {
  let (store, campaign) = common::store_with_campaign();
  let ctl = CampaignStateController::new(store);
  match ctl.require_active(&campaign.id) {
    Err(StoreError::Domain(DomainError::CampaignNotActive { status, .. })) => assert_eq!(status, CampaignStatus::Created),
    other => panic!("esperaba CampaignNotActive, obtuve {:?}", other.map(|c| c.status)),
  }
  ctl.start(&campaign.id).unwrap();
  assert!(ctl.require_active(&campaign.id).is_ok());
}

#[test]
fn create_requires_known_process() {
  let (store, _) = common::store_with_campaign();
  let ctl = CampaignStateController::new(store);
  let orphan = Campaign::new(uuid::Uuid::new_v4(), "x", IndexMap::new()).unwrap();
  assert!(matches!(ctl.create(orphan), Err(StoreError::NotFound(_))));
}
