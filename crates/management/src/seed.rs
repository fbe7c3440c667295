//! Loading campaigns from a JSON seed file at startup.
//!
//! The file holds an array of campaign drafts, each with an optional
//! `activation` order applied right after the campaign is created.

use crate::activation::{ActivationController, ActivationOutcome, ActivationRequest};
use crate::store::{CampaignDraft, CampaignStore};
use campaign_core::types::Campaign;
use campaign_core::CampaignResult;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCampaign {
    #[serde(flatten)]
    pub draft: CampaignDraft,
    #[serde(default)]
    pub activation: ActivationRequest,
}

pub fn parse_seed(json: &str) -> CampaignResult<Vec<SeedCampaign>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_seed_file(path: impl AsRef<Path>) -> CampaignResult<Vec<SeedCampaign>> {
    let json = std::fs::read_to_string(path)?;
    parse_seed(&json)
}

/// Create every seeded campaign and apply its activation order. Stops at the
/// first invalid campaign.
pub fn apply_seed(
    store: &CampaignStore,
    controller: &ActivationController,
    seeds: Vec<SeedCampaign>,
) -> CampaignResult<Vec<(Campaign, ActivationOutcome)>> {
    let mut created = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let campaign = store.create_campaign(seed.draft)?;
        let outcome = controller.set_active(campaign.id, &seed.activation)?;
        info!(
            campaign_id = %campaign.id,
            name = %campaign.name,
            active = outcome.active,
            "Seeded campaign"
        );
        created.push((campaign, outcome));
    }
    Ok(created)
}
