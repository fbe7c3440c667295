//! Weighted-random banner variant selection for campaign A/B tests.

use crate::error::{CampaignError, CampaignResult};
use crate::types::Variant;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sum every campaign in use must reach over its active variants.
pub const TOTAL_PROPORTION: u32 = 100;

/// Outcome of a variant draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantDecision {
    Banner { variant_id: Uuid, banner_id: Uuid },
    /// Visitor falls into the control group and sees no banner.
    ControlGroup { variant_id: Uuid },
}

impl VariantDecision {
    pub fn variant_id(&self) -> Uuid {
        match self {
            Self::Banner { variant_id, .. } | Self::ControlGroup { variant_id } => *variant_id,
        }
    }

    pub fn banner_id(&self) -> Option<Uuid> {
        match self {
            Self::Banner { banner_id, .. } => Some(*banner_id),
            Self::ControlGroup { .. } => None,
        }
    }
}

/// Check a campaign's variant set before it can be used for serving.
///
/// Proportions must be within `0..=100`, every non-control variant needs a
/// banner and the proportions of active variants (proportion > 0) must add up
/// to exactly 100. Nothing is normalized.
pub fn validate_variants(variants: &[Variant]) -> CampaignResult<()> {
    for variant in variants {
        if variant.proportion > TOTAL_PROPORTION {
            return Err(CampaignError::InvalidVariants(format!(
                "variant {} has proportion {} outside 0..=100",
                variant.id, variant.proportion
            )));
        }
        if variant.control_group && variant.banner_id.is_some() {
            return Err(CampaignError::InvalidVariants(format!(
                "control group variant {} must not reference a banner",
                variant.id
            )));
        }
        if !variant.control_group && variant.banner_id.is_none() {
            return Err(CampaignError::InvalidVariants(format!(
                "variant {} has no banner and is not a control group",
                variant.id
            )));
        }
    }

    let sum: u32 = variants
        .iter()
        .filter(|v| v.proportion > 0)
        .map(|v| v.proportion)
        .sum();
    if sum != TOTAL_PROPORTION {
        return Err(CampaignError::InvalidVariants(format!(
            "active variant proportions sum to {sum}, expected {TOTAL_PROPORTION}"
        )));
    }
    Ok(())
}

struct Bin {
    upper: u32,
    decision: VariantDecision,
}

/// Cumulative proportion bins over a validated variant set.
pub struct VariantSelector {
    bins: Vec<Bin>,
}

impl VariantSelector {
    /// Build bins from the variants with proportion > 0, ordered by weight
    /// ascending. Ties keep their original order.
    pub fn new(variants: &[Variant]) -> CampaignResult<Self> {
        validate_variants(variants)?;

        let mut active: Vec<&Variant> = variants.iter().filter(|v| v.proportion > 0).collect();
        active.sort_by_key(|v| v.weight);

        let mut cumulative = 0;
        let mut bins = Vec::with_capacity(active.len());
        for variant in active {
            cumulative += variant.proportion;
            let decision = match variant.banner_id {
                Some(banner_id) if !variant.control_group => VariantDecision::Banner {
                    variant_id: variant.id,
                    banner_id,
                },
                _ => VariantDecision::ControlGroup {
                    variant_id: variant.id,
                },
            };
            bins.push(Bin {
                upper: cumulative,
                decision,
            });
        }
        Ok(Self { bins })
    }

    /// Select the variant whose bin contains `r`. Returns `None` when `r` is
    /// outside `[0, 100)`.
    pub fn select(&self, r: f64) -> Option<VariantDecision> {
        if !(0.0..f64::from(TOTAL_PROPORTION)).contains(&r) {
            return None;
        }
        self.bins
            .iter()
            .find(|bin| f64::from(bin.upper) > r)
            .map(|bin| bin.decision)
    }

    /// Draw a uniform `r` from `rng` and select.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> VariantDecision {
        let r = rng.gen_range(0.0..f64::from(TOTAL_PROPORTION));
        // bins cover [0, 100) completely once validated
        match self.select(r) {
            Some(decision) => decision,
            None => self.bins[self.bins.len() - 1].decision,
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn campaign() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn test_bins_follow_weight_order() {
        let c = campaign();
        let a = Variant::banner(c, Uuid::new_v4(), 30, 1);
        let b = Variant::banner(c, Uuid::new_v4(), 70, 2);
        let disabled = Variant::banner(c, Uuid::new_v4(), 0, 0);
        let selector = VariantSelector::new(&[b.clone(), disabled.clone(), a.clone()]).unwrap();

        assert_eq!(selector.len(), 2);
        assert_eq!(selector.select(0.0).unwrap().variant_id(), a.id);
        assert_eq!(selector.select(10.0).unwrap().variant_id(), a.id);
        assert_eq!(selector.select(29.999).unwrap().variant_id(), a.id);
        assert_eq!(selector.select(30.0).unwrap().variant_id(), b.id);
        assert_eq!(selector.select(50.0).unwrap().variant_id(), b.id);
        assert_eq!(selector.select(99.999).unwrap().variant_id(), b.id);
        for r in 0..100 {
            assert_ne!(selector.select(r as f64).unwrap().variant_id(), disabled.id);
        }
    }

    #[test]
    fn test_equal_weights_keep_insertion_order() {
        let c = campaign();
        let first = Variant::banner(c, Uuid::new_v4(), 50, 0);
        let second = Variant::banner(c, Uuid::new_v4(), 50, 0);
        let selector = VariantSelector::new(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(selector.select(49.0).unwrap().variant_id(), first.id);
        assert_eq!(selector.select(50.0).unwrap().variant_id(), second.id);
    }

    #[test]
    fn test_out_of_range_draw() {
        let c = campaign();
        let selector = VariantSelector::new(&[Variant::banner(c, Uuid::new_v4(), 100, 0)]).unwrap();
        assert!(selector.select(100.0).is_none());
        assert!(selector.select(-0.5).is_none());
        assert!(selector.select(f64::NAN).is_none());
    }

    #[test]
    fn test_control_group_has_no_banner() {
        let c = campaign();
        let control = Variant::control_group(c, 40, 0);
        let banner = Variant::banner(c, Uuid::new_v4(), 60, 1);
        let selector = VariantSelector::new(&[control.clone(), banner]).unwrap();

        let decision = selector.select(20.0).unwrap();
        assert_eq!(decision, VariantDecision::ControlGroup { variant_id: control.id });
        assert!(decision.banner_id().is_none());
    }

    #[test]
    fn test_rejects_bad_sums() {
        let c = campaign();
        let under = [Variant::banner(c, Uuid::new_v4(), 40, 0), Variant::banner(c, Uuid::new_v4(), 50, 1)];
        let err = VariantSelector::new(&under).err().unwrap();
        assert!(matches!(err, CampaignError::InvalidVariants(_)));
        assert!(err.is_configuration());

        let over = [Variant::banner(c, Uuid::new_v4(), 60, 0), Variant::control_group(c, 50, 1)];
        assert!(VariantSelector::new(&over).is_err());
        assert!(VariantSelector::new(&[]).is_err());
    }

    #[test]
    fn test_rejects_malformed_variants() {
        let c = campaign();
        let mut no_banner = Variant::banner(c, Uuid::new_v4(), 100, 0);
        no_banner.banner_id = None;
        assert!(validate_variants(&[no_banner]).is_err());

        let mut control_with_banner = Variant::control_group(c, 100, 0);
        control_with_banner.banner_id = Some(Uuid::new_v4());
        assert!(validate_variants(&[control_with_banner]).is_err());

        let too_big = Variant::banner(c, Uuid::new_v4(), 101, 0);
        assert!(validate_variants(&[too_big]).is_err());
    }

    #[test]
    fn test_distribution_converges() {
        let c = campaign();
        let a = Variant::banner(c, Uuid::new_v4(), 20, 0);
        let b = Variant::banner(c, Uuid::new_v4(), 50, 1);
        let control = Variant::control_group(c, 30, 2);
        let selector = VariantSelector::new(&[a.clone(), b.clone(), control.clone()]).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;
        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(selector.pick(&mut rng).variant_id()).or_default() += 1;
        }

        for (variant, expected) in [(&a, 0.2), (&b, 0.5), (&control, 0.3)] {
            let observed = counts[&variant.id] as f64 / draws as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "variant share {observed} too far from {expected}"
            );
        }
    }
}
