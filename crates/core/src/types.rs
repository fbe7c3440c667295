use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A banner campaign. Owns its variants and segment bindings; schedules are
/// kept by the schedule book and reference the campaign by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub targeting: TargetingRules,
    #[serde(default)]
    pub once_per_session: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub segments: Vec<SegmentBinding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Visitor-level targeting rules evaluated at serve time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetingRules {
    /// `None` matches both signed-in and anonymous visitors.
    #[serde(default)]
    pub signed_in: Option<bool>,
    #[serde(default)]
    pub using_adblock: Option<bool>,
    /// Empty list matches every device.
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub referer_patterns: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    /// When set, `countries` lists countries where the campaign must not show.
    #[serde(default)]
    pub countries_blacklist: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Desktop,
    Mobile,
    Tablet,
}

/// Reference from a campaign to a provider-defined audience segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentBinding {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub provider: String,
    pub code: String,
    /// Inclusive bindings require membership, exclusive bindings forbid it.
    pub inclusive: bool,
}

impl SegmentBinding {
    pub fn new(campaign_id: Uuid, provider: &str, code: &str, inclusive: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            provider: provider.to_string(),
            code: code.to_string(),
            inclusive,
        }
    }

    /// True when both bindings point at the same segment with the same polarity.
    pub fn same_target(&self, other: &SegmentBinding) -> bool {
        self.provider == other.provider
            && self.code == other.code
            && self.inclusive == other.inclusive
    }
}

/// One arm of a campaign's banner A/B test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variant {
    pub id: Uuid,
    #[serde(default)]
    pub campaign_id: Uuid,
    #[serde(default)]
    pub banner_id: Option<Uuid>,
    #[serde(default)]
    pub control_group: bool,
    pub proportion: u32,
    #[serde(default)]
    pub weight: i32,
}

impl Variant {
    pub fn banner(campaign_id: Uuid, banner_id: Uuid, proportion: u32, weight: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            banner_id: Some(banner_id),
            control_group: false,
            proportion,
            weight,
        }
    }

    pub fn control_group(campaign_id: Uuid, proportion: u32, weight: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            banner_id: None,
            control_group: true,
            proportion,
            weight,
        }
    }
}

/// Segment as advertised by a provider listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentInfo {
    pub code: String,
    pub name: String,
    pub provider: String,
}

/// Visitor attributes supplied by the serving layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Visitor {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub browser_id: Option<String>,
    #[serde(default)]
    pub signed_in: bool,
    #[serde(default)]
    pub using_adblock: bool,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Visitor {
    /// Identifier used for segment membership lookups. Signed-in visitors are
    /// matched by user id, anonymous ones by browser id.
    pub fn segment_identifier(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.browser_id.as_deref())
    }
}
