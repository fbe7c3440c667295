//! Visitor targeting rules: signed-in state, adblock, device, URL and referer
//! patterns, country white/blacklist.

use crate::types::{TargetingRules, Visitor};

impl TargetingRules {
    /// Evaluate every rule against the visitor. All rules must pass.
    pub fn matches(&self, visitor: &Visitor) -> bool {
        self.matches_signed_in(visitor)
            && self.matches_adblock(visitor)
            && self.matches_device(visitor)
            && matches_patterns(&self.url_patterns, visitor.url.as_deref())
            && matches_patterns(&self.referer_patterns, visitor.referer.as_deref())
            && self.matches_country(visitor)
    }

    fn matches_signed_in(&self, visitor: &Visitor) -> bool {
        self.signed_in.map_or(true, |required| required == visitor.signed_in)
    }

    fn matches_adblock(&self, visitor: &Visitor) -> bool {
        self.using_adblock
            .map_or(true, |required| required == visitor.using_adblock)
    }

    fn matches_device(&self, visitor: &Visitor) -> bool {
        if self.devices.is_empty() {
            return true;
        }
        visitor
            .device
            .map_or(false, |device| self.devices.contains(&device))
    }

    fn matches_country(&self, visitor: &Visitor) -> bool {
        if self.countries.is_empty() {
            return true;
        }
        let listed = visitor.country.as_deref().map_or(false, |country| {
            self.countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(country))
        });
        if self.countries_blacklist {
            !listed
        } else {
            listed
        }
    }
}

/// Substring match against any pattern; an empty pattern list matches all.
fn matches_patterns(patterns: &[String], value: Option<&str>) -> bool {
    if patterns.is_empty() {
        return true;
    }
    match value {
        Some(value) => patterns
            .iter()
            .any(|p| !p.is_empty() && value.contains(p.as_str())),
        None => false,
    }
}
