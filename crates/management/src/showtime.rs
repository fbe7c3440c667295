//! Serve-time campaign evaluation for a single visitor.

use crate::store::CampaignStore;
use campaign_core::types::{Campaign, Visitor};
use campaign_core::variants::{VariantDecision, VariantSelector, TOTAL_PROPORTION};
use campaign_core::CampaignResult;
use campaign_segmentation::SegmentGate;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShowtimeDecision {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub once_per_session: bool,
    pub decision: VariantDecision,
}

pub struct Showtime {
    store: Arc<CampaignStore>,
    gate: SegmentGate,
}

impl Showtime {
    pub fn new(store: Arc<CampaignStore>, gate: SegmentGate) -> Self {
        Self { store, gate }
    }

    /// Evaluate all campaigns for the visitor. A campaign whose configuration
    /// is broken or whose segments cannot be resolved is skipped and logged.
    pub async fn evaluate(&self, visitor: &Visitor) -> Vec<ShowtimeDecision> {
        let now = Utc::now();
        let mut decisions = Vec::new();
        for campaign in self.store.list_campaigns() {
            let r = draw();
            match self.evaluate_campaign(&campaign, visitor, r, now).await {
                Ok(Some(decision)) => decisions.push(ShowtimeDecision {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    once_per_session: campaign.once_per_session,
                    decision,
                }),
                Ok(None) => {}
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "Unable to evaluate campaign");
                }
            }
        }
        decisions
    }

    /// Decide whether `campaign` shows for the visitor and which variant,
    /// using `r` in `[0, 100)` as the variant draw.
    pub async fn evaluate_campaign(
        &self,
        campaign: &Campaign,
        visitor: &Visitor,
        r: f64,
        now: DateTime<Utc>,
    ) -> CampaignResult<Option<VariantDecision>> {
        if !self.store.schedules().is_running(campaign.id, now) {
            return Ok(None);
        }
        if !campaign.targeting.matches(visitor) {
            debug!(campaign_id = %campaign.id, "Visitor outside campaign targeting");
            return Ok(None);
        }

        let selector = VariantSelector::new(&campaign.variants)?;

        if !self
            .gate
            .allows(&campaign.segments, visitor.segment_identifier())
            .await?
        {
            return Ok(None);
        }

        Ok(selector.select(r))
    }
}

fn draw() -> f64 {
    rand::thread_rng().gen_range(0.0..f64::from(TOTAL_PROPORTION))
}
