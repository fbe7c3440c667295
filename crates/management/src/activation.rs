//! Campaign activation controller.
//!
//! Every change of a campaign's on/off state goes through here and is
//! expressed as schedule changes, so the exposed `active` state is always the
//! schedule-derived "is running" answer.

use crate::schedule::{ActivateOutcome, ScheduleBook};
use crate::store::CampaignStore;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const MSG_ACTIVATED: &str = "Campaign was activated and is running.";
pub const MSG_ALREADY_RUNNING: &str = "Campaign is already running, no change.";
pub const MSG_DEACTIVATED: &str = "Campaign was deactivated, all schedules were stopped.";
pub const MSG_ALREADY_INACTIVE: &str = "Campaign is already inactive, no change.";

/// Activation order sent by the admin layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationRequest {
    /// `None` leaves schedules untouched.
    #[serde(default)]
    pub desired_active: Option<bool>,
    #[serde(default)]
    pub schedule_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schedule_end: Option<DateTime<Utc>>,
}

impl ActivationRequest {
    pub fn activate() -> Self {
        Self {
            desired_active: Some(true),
            ..Default::default()
        }
    }

    pub fn deactivate() -> Self {
        Self {
            desired_active: Some(false),
            ..Default::default()
        }
    }

    pub fn scheduled(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            desired_active: Some(true),
            schedule_start: Some(start),
            schedule_end: end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationOutcome {
    pub active: bool,
    pub message: Option<String>,
}

pub struct ActivationController {
    store: Arc<CampaignStore>,
}

impl ActivationController {
    pub fn new(store: Arc<CampaignStore>) -> Self {
        Self { store }
    }

    fn schedules(&self) -> &ScheduleBook {
        self.store.schedules()
    }

    pub fn is_active(&self, campaign_id: Uuid) -> bool {
        self.schedules().is_running(campaign_id, Utc::now())
    }

    /// Apply an activation order to the campaign.
    pub fn set_active(&self, campaign_id: Uuid, request: &ActivationRequest) -> CampaignResult<ActivationOutcome> {
        if self.store.get_campaign(campaign_id).is_none() {
            return Err(CampaignError::CampaignNotFound(campaign_id));
        }
        let now = Utc::now();

        let message = match request.desired_active {
            None => None,
            Some(true) => Some(self.activate(campaign_id, request, now)?),
            Some(false) => Some(self.deactivate(campaign_id, now)?),
        };

        Ok(ActivationOutcome {
            active: self.schedules().is_running(campaign_id, Utc::now()),
            message,
        })
    }

    /// Flip the campaign: stop it when running, start it otherwise.
    pub fn toggle_active(&self, campaign_id: Uuid) -> CampaignResult<ActivationOutcome> {
        let request = if self.is_active(campaign_id) {
            ActivationRequest::deactivate()
        } else {
            ActivationRequest::activate()
        };
        self.set_active(campaign_id, &request)
    }

    fn activate(&self, campaign_id: Uuid, request: &ActivationRequest, now: DateTime<Utc>) -> CampaignResult<String> {
        if let Some(start) = request.schedule_start {
            let schedule = self.schedules().create(campaign_id, start, request.schedule_end, now)?;
            metrics::counter!("campaign.activation", "mode" => "scheduled").increment(1);
            return Ok(format!(
                "Schedule with start time '{}' added",
                schedule.start_time.format("%a, %b %-d, %Y %-I:%M %p")
            ));
        }

        match self.schedules().activate_now(campaign_id, now)? {
            ActivateOutcome::Activated(_) => {
                metrics::counter!("campaign.activation", "mode" => "now").increment(1);
                Ok(MSG_ACTIVATED.to_string())
            }
            ActivateOutcome::AlreadyRunning => Ok(MSG_ALREADY_RUNNING.to_string()),
        }
    }

    fn deactivate(&self, campaign_id: Uuid, now: DateTime<Utc>) -> CampaignResult<String> {
        let outcome = self.schedules().stop_all(campaign_id, now);
        if !outcome.failed.is_empty() {
            let failed: Vec<String> = outcome
                .failed
                .iter()
                .map(|(id, e)| format!("{id}: {e}"))
                .collect();
            return Err(CampaignError::Persistence(format!(
                "stopped {} schedule(s) {:?}, failed to stop {}",
                outcome.stopped.len(),
                outcome.stopped,
                failed.join("; ")
            )));
        }

        if outcome.changed() {
            info!(campaign_id = %campaign_id, "Campaign deactivated");
            metrics::counter!("campaign.deactivation").increment(1);
            Ok(MSG_DEACTIVATED.to_string())
        } else {
            Ok(MSG_ALREADY_INACTIVE.to_string())
        }
    }
}
