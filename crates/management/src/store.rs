//! In-memory campaign store backed by DashMap.
//!
//! Campaigns own their variants and segment bindings; schedules live in the
//! store's [`ScheduleBook`] keyed by campaign id.

use crate::schedule::ScheduleBook;
use campaign_core::types::{Campaign, SegmentBinding, TargetingRules, Variant};
use campaign_core::variants::validate_variants;
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Variant as submitted by the admin form. Variants without an id are new.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub banner_id: Option<Uuid>,
    #[serde(default)]
    pub control_group: bool,
    pub proportion: u32,
    #[serde(default)]
    pub weight: i32,
}

impl VariantInput {
    pub fn banner(banner_id: Uuid, proportion: u32, weight: i32) -> Self {
        Self {
            banner_id: Some(banner_id),
            proportion,
            weight,
            ..Default::default()
        }
    }

    pub fn control_group(proportion: u32) -> Self {
        Self {
            control_group: true,
            proportion,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInput {
    pub provider: String,
    pub code: String,
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub name: String,
    #[serde(default)]
    pub targeting: TargetingRules,
    #[serde(default)]
    pub once_per_session: bool,
    #[serde(default)]
    pub variants: Vec<VariantInput>,
    #[serde(default)]
    pub segments: Vec<SegmentInput>,
}

/// Partial update of a campaign. Variants are upserted by id, segments are
/// added unless an identical binding exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub targeting: Option<TargetingRules>,
    #[serde(default)]
    pub once_per_session: Option<bool>,
    #[serde(default)]
    pub variants: Vec<VariantInput>,
    #[serde(default)]
    pub variants_to_remove: Vec<Uuid>,
    #[serde(default)]
    pub segments: Vec<SegmentInput>,
    #[serde(default)]
    pub removed_segments: Vec<Uuid>,
}

pub struct CampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
    schedules: Arc<ScheduleBook>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::with_schedules(Arc::new(ScheduleBook::in_memory()))
    }

    pub fn with_schedules(schedules: Arc<ScheduleBook>) -> Self {
        info!("Campaign store initialized (in-memory)");
        Self {
            campaigns: DashMap::new(),
            schedules,
        }
    }

    pub fn schedules(&self) -> &ScheduleBook {
        &self.schedules
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    pub fn create_campaign(&self, draft: CampaignDraft) -> CampaignResult<Campaign> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut campaign = Campaign {
            id,
            name: draft.name,
            targeting: draft.targeting,
            once_per_session: draft.once_per_session,
            variants: Vec::new(),
            segments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        upsert_variants(&mut campaign, draft.variants)?;
        add_segments(&mut campaign, draft.segments);
        validate_variants(&campaign.variants)?;

        self.campaigns.insert(id, campaign.clone());
        info!(campaign_id = %id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    /// Apply an admin form save. The resulting variant set must be valid,
    /// otherwise nothing is changed.
    pub fn save_campaign(&self, id: Uuid, update: CampaignUpdate) -> CampaignResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(CampaignError::CampaignNotFound(id))?;

        let mut campaign = entry.value().clone();
        if let Some(name) = update.name {
            campaign.name = name;
        }
        if let Some(targeting) = update.targeting {
            campaign.targeting = targeting;
        }
        if let Some(once) = update.once_per_session {
            campaign.once_per_session = once;
        }

        campaign
            .variants
            .retain(|v| !update.variants_to_remove.contains(&v.id));
        upsert_variants(&mut campaign, update.variants)?;
        validate_variants(&campaign.variants)?;

        add_segments(&mut campaign, update.segments);
        campaign
            .segments
            .retain(|s| !update.removed_segments.contains(&s.id));

        campaign.updated_at = Utc::now();
        *entry.value_mut() = campaign.clone();
        info!(campaign_id = %id, "Campaign updated");
        Ok(campaign)
    }

    /// Duplicate a campaign with fresh ids. Schedules are not copied, so the
    /// copy starts inactive.
    pub fn copy_campaign(&self, id: Uuid) -> CampaignResult<Campaign> {
        let source = self.get_campaign(id).ok_or(CampaignError::CampaignNotFound(id))?;
        let now = Utc::now();
        let copy_id = Uuid::new_v4();

        let copy = Campaign {
            id: copy_id,
            name: format!("{} (copy)", source.name),
            targeting: source.targeting.clone(),
            once_per_session: source.once_per_session,
            variants: source
                .variants
                .iter()
                .map(|v| Variant {
                    id: Uuid::new_v4(),
                    campaign_id: copy_id,
                    ..v.clone()
                })
                .collect(),
            segments: source
                .segments
                .iter()
                .map(|s| SegmentBinding::new(copy_id, &s.provider, &s.code, s.inclusive))
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.campaigns.insert(copy_id, copy.clone());
        info!(source_id = %id, campaign_id = %copy_id, "Campaign copied");
        Ok(copy)
    }

    /// Remove a campaign together with its schedules.
    pub fn delete_campaign(&self, id: Uuid) -> bool {
        let removed = self.campaigns.remove(&id).is_some();
        if removed {
            self.schedules.remove_campaign(id);
            info!(campaign_id = %id, "Campaign deleted");
        }
        removed
    }

    /// Distinct segment bindings over all campaigns, one per provider/code.
    pub fn segment_bindings(&self) -> Vec<SegmentBinding> {
        let mut seen = std::collections::HashSet::new();
        let mut bindings = Vec::new();
        for campaign in self.campaigns.iter() {
            for segment in &campaign.segments {
                if seen.insert((segment.provider.clone(), segment.code.clone())) {
                    bindings.push(segment.clone());
                }
            }
        }
        bindings
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

impl Default for CampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_variants(campaign: &mut Campaign, inputs: Vec<VariantInput>) -> CampaignResult<()> {
    for input in inputs {
        let banner_id = if input.control_group { None } else { input.banner_id };
        match input.id {
            Some(id) => {
                let variant = campaign
                    .variants
                    .iter_mut()
                    .find(|v| v.id == id)
                    .ok_or_else(|| {
                        CampaignError::InvalidVariants(format!(
                            "variant {id} does not belong to campaign {}",
                            campaign.id
                        ))
                    })?;
                variant.banner_id = banner_id;
                variant.control_group = input.control_group;
                variant.proportion = input.proportion;
                variant.weight = input.weight;
            }
            None => campaign.variants.push(Variant {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                banner_id,
                control_group: input.control_group,
                proportion: input.proportion,
                weight: input.weight,
            }),
        }
    }
    Ok(())
}

fn add_segments(campaign: &mut Campaign, inputs: Vec<SegmentInput>) {
    for input in inputs {
        let binding = SegmentBinding::new(campaign.id, &input.provider, &input.code, input.inclusive);
        if !campaign.segments.iter().any(|s| s.same_target(&binding)) {
            campaign.segments.push(binding);
        }
    }
}
