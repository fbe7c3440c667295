//! Campaign schedules and their lifecycle.
//!
//! A campaign is running exactly when one of its schedules is running; there
//! is no separate on/off flag. Schedule changes for one campaign are
//! serialized on that campaign's lock, so a check followed by a create cannot
//! interleave with another writer.

use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Start time not reached yet.
    Planned,
    /// Started from a plan; runs until `end_time` if set.
    Running,
    /// Started manually, open-ended until stopped.
    Executed,
    /// Terminal; `end_time` holds the moment it was stopped.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// `[start_time, end_time)`, open-ended when there is no end.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && self.end_time.map_or(true, |end| now < end)
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map_or(false, |end| end <= now)
    }

    /// Status as of `now`. A planned schedule whose start has passed counts
    /// as running even before `promote_due` records it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ScheduleStatus {
        match self.status {
            ScheduleStatus::Planned if self.start_time <= now => ScheduleStatus::Running,
            status => status,
        }
    }

    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.effective_status(now),
            ScheduleStatus::Running | ScheduleStatus::Executed
        ) && self.window_contains(now)
    }

    /// Running now, or planned and not over yet. These are what a stop ends.
    pub fn is_running_or_planned(&self, now: DateTime<Utc>) -> bool {
        self.status != ScheduleStatus::Stopped && !self.has_ended(now)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable storage for schedule rows. Called once per changed schedule; the
/// in-memory book is updated only after the row was saved.
pub trait SchedulePersistence: Send + Sync {
    fn save(&self, schedule: &Schedule) -> CampaignResult<()>;
}

/// Keeps schedules in memory only.
pub struct NoopPersistence;

impl SchedulePersistence for NoopPersistence {
    fn save(&self, _schedule: &Schedule) -> CampaignResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivateOutcome {
    Activated(Schedule),
    /// A schedule is already running; nothing was created.
    AlreadyRunning,
}

#[derive(Debug, Default)]
pub struct StopOutcome {
    pub stopped: Vec<Uuid>,
    pub failed: Vec<(Uuid, CampaignError)>,
}

impl StopOutcome {
    pub fn changed(&self) -> bool {
        !self.stopped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Schedule Book
// ---------------------------------------------------------------------------

/// All schedules, grouped per campaign.
pub struct ScheduleBook {
    campaigns: DashMap<Uuid, Arc<Mutex<Vec<Schedule>>>>,
    persistence: Arc<dyn SchedulePersistence>,
}

impl ScheduleBook {
    pub fn new(persistence: Arc<dyn SchedulePersistence>) -> Self {
        Self {
            campaigns: DashMap::new(),
            persistence,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopPersistence))
    }

    fn campaign(&self, campaign_id: Uuid) -> Arc<Mutex<Vec<Schedule>>> {
        self.campaigns
            .entry(campaign_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Add a schedule for the given window. It starts as planned when the
    /// start lies in the future, otherwise as running.
    pub fn create(
        &self,
        campaign_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CampaignResult<Schedule> {
        if let Some(end) = end_time {
            if end <= start_time {
                return Err(CampaignError::InvalidSchedule(format!(
                    "end time {end} must be after start time {start_time}"
                )));
            }
            if end <= now {
                return Err(CampaignError::InvalidSchedule(format!(
                    "end time {end} is already in the past"
                )));
            }
        }

        let status = if start_time > now {
            ScheduleStatus::Planned
        } else {
            ScheduleStatus::Running
        };
        let schedule = Schedule {
            id: Uuid::new_v4(),
            campaign_id,
            start_time,
            end_time,
            status,
            updated_at: now,
        };

        let campaign = self.campaign(campaign_id);
        let mut schedules = campaign.lock();
        self.persistence.save(&schedule)?;
        schedules.push(schedule.clone());

        info!(campaign_id = %campaign_id, schedule_id = %schedule.id, status = ?status, "Schedule created");
        Ok(schedule)
    }

    /// Start the campaign immediately unless something already runs it.
    pub fn activate_now(&self, campaign_id: Uuid, now: DateTime<Utc>) -> CampaignResult<ActivateOutcome> {
        let campaign = self.campaign(campaign_id);
        let mut schedules = campaign.lock();

        if schedules.iter().any(|s| s.is_running(now)) {
            debug!(campaign_id = %campaign_id, "Campaign already running");
            return Ok(ActivateOutcome::AlreadyRunning);
        }

        let schedule = Schedule {
            id: Uuid::new_v4(),
            campaign_id,
            start_time: now,
            end_time: None,
            status: ScheduleStatus::Executed,
            updated_at: now,
        };
        self.persistence.save(&schedule)?;
        schedules.push(schedule.clone());

        info!(campaign_id = %campaign_id, schedule_id = %schedule.id, "Campaign activated");
        Ok(ActivateOutcome::Activated(schedule))
    }

    /// Stop every running or planned schedule of the campaign, ending it at
    /// `now`. Each schedule is saved on its own; failures are collected and
    /// leave that schedule untouched.
    pub fn stop_all(&self, campaign_id: Uuid, now: DateTime<Utc>) -> StopOutcome {
        let campaign = self.campaign(campaign_id);
        let mut schedules = campaign.lock();
        let mut outcome = StopOutcome::default();

        for schedule in schedules.iter_mut().filter(|s| s.is_running_or_planned(now)) {
            let mut stopped = schedule.clone();
            stopped.status = ScheduleStatus::Stopped;
            stopped.end_time = Some(now);
            stopped.updated_at = now;

            match self.persistence.save(&stopped) {
                Ok(()) => {
                    *schedule = stopped;
                    outcome.stopped.push(schedule.id);
                }
                Err(e) => {
                    error!(campaign_id = %campaign_id, schedule_id = %schedule.id, error = %e, "Unable to stop schedule");
                    outcome.failed.push((schedule.id, e));
                }
            }
        }

        if outcome.changed() {
            info!(campaign_id = %campaign_id, stopped = outcome.stopped.len(), "Campaign schedules stopped");
        }
        outcome
    }

    pub fn is_running(&self, campaign_id: Uuid, now: DateTime<Utc>) -> bool {
        self.campaigns
            .get(&campaign_id)
            .map_or(false, |c| c.lock().iter().any(|s| s.is_running(now)))
    }

    /// Record planned schedules whose start time has arrived as running.
    /// Returns how many were promoted.
    pub fn promote_due(&self, now: DateTime<Utc>) -> usize {
        let campaigns: Vec<Arc<Mutex<Vec<Schedule>>>> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();

        let mut promoted = 0;
        for campaign in campaigns {
            let mut schedules = campaign.lock();
            for schedule in schedules
                .iter_mut()
                .filter(|s| s.status == ScheduleStatus::Planned && s.start_time <= now)
            {
                let mut running = schedule.clone();
                running.status = ScheduleStatus::Running;
                running.updated_at = now;
                match self.persistence.save(&running) {
                    Ok(()) => {
                        *schedule = running;
                        promoted += 1;
                    }
                    Err(e) => {
                        error!(schedule_id = %schedule.id, error = %e, "Unable to start planned schedule");
                    }
                }
            }
        }
        if promoted > 0 {
            info!(promoted, "Planned schedules started");
        }
        promoted
    }

    pub fn schedules(&self, campaign_id: Uuid) -> Vec<Schedule> {
        self.campaigns
            .get(&campaign_id)
            .map(|c| c.lock().clone())
            .unwrap_or_default()
    }

    /// Forget all schedules of a deleted campaign.
    pub fn remove_campaign(&self, campaign_id: Uuid) {
        self.campaigns.remove(&campaign_id);
    }
}

impl Default for ScheduleBook {
    fn default() -> Self {
        Self::in_memory()
    }
}
