#![allow(dead_code)]
use campaign_domain::{Campaign, InputVariable, Objective, ProcessSpec, StrategyConfig};
use campaign_store::{CampaignRepository, InMemoryCampaignStore, ProcessRepository};
use indexmap::IndexMap;
use std::sync::Arc;

pub fn process() -> ProcessSpec {
  ProcessSpec::new("reactor",
                   vec![InputVariable::continuous("temp", 20.0, 80.0), InputVariable::categorical("cat", ["a", "b"])],
                   vec![Objective::maximize("yield"), Objective::minimize("cost")]).unwrap()
}

pub fn store_with_campaign() -> (Arc<InMemoryCampaignStore>, Campaign) {
  let store = Arc::new(InMemoryCampaignStore::new());
  let spec = process();
  store.insert_process(&spec).unwrap();
  let mut strategies = IndexMap::new();
  strategies.insert("default".to_string(), StrategyConfig::new("lhs", "idw", "ucb"));
  let campaign = Campaign::new(spec.id, "c1", strategies).unwrap();
  store.insert_campaign(&campaign).unwrap();
  (store, campaign)
}
