//! Shared types used across modelgate crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of distinct selector values a session can draw.
pub const SELECTOR_SPACE: u8 = 16;

/// A class of backend capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Cheap backend, warm only while scaled up.
    Small,
    /// Expensive backend, the fallback of last resort.
    Large,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Small => "small",
            Tier::Large => "large",
        }
    }

    /// Capitalised name used in response text.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Small => "Small",
            Tier::Large => "Large",
        }
    }

    /// The other tier.
    pub fn other(&self) -> Tier {
        match self {
            Tier::Small => Tier::Large,
            Tier::Large => Tier::Small,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "small-model" => Ok(Tier::Small),
            "large" | "large-model" => Ok(Tier::Large),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Bounded routing value drawn once per session, in `0..SELECTOR_SPACE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Selector(u8);

impl Selector {
    /// Build a selector, rejecting values outside the selector space.
    pub fn new(value: u8) -> Option<Self> {
        (value < SELECTOR_SPACE).then_some(Self(value))
    }

    /// Fold an arbitrary byte into the selector space.
    ///
    /// `SELECTOR_SPACE` divides 256, so a uniform byte yields a uniform selector.
    pub fn from_entropy(byte: u8) -> Self {
        Self(byte % SELECTOR_SPACE)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Selector {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Selector::new(value).ok_or_else(|| format!("selector {value} out of range"))
    }
}

impl From<Selector> for u8 {
    fn from(s: Selector) -> u8 {
        s.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a selector to the tier it routes to, given the tier currently
/// accepting new sessions.
///
/// While the large tier is active every selector maps to it. While the
/// small tier is active, selectors below `small_slots` map to small and
/// the rest stay on large.
pub fn tier_for_selector(selector: Selector, active: Tier, small_slots: u8) -> Tier {
    match active {
        Tier::Large => Tier::Large,
        Tier::Small if selector.value() < small_slots => Tier::Small,
        Tier::Small => Tier::Large,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_bounds() {
        assert!(Selector::new(0).is_some());
        assert!(Selector::new(15).is_some());
        assert!(Selector::new(16).is_none());
        assert_eq!(Selector::from_entropy(255).value(), 15);
        assert_eq!(Selector::from_entropy(16).value(), 0);
    }

    #[test]
    fn large_active_routes_everything_to_large() {
        for v in 0..SELECTOR_SPACE {
            let s = Selector::new(v).unwrap();
            assert_eq!(tier_for_selector(s, Tier::Large, SELECTOR_SPACE), Tier::Large);
        }
    }

    #[test]
    fn small_slots_split_selectors() {
        let low = Selector::new(3).unwrap();
        let high = Selector::new(12).unwrap();
        assert_eq!(tier_for_selector(low, Tier::Small, 8), Tier::Small);
        assert_eq!(tier_for_selector(high, Tier::Small, 8), Tier::Large);
        assert_eq!(tier_for_selector(high, Tier::Small, SELECTOR_SPACE), Tier::Small);
        assert_eq!(tier_for_selector(low, Tier::Small, 0), Tier::Large);
    }

    #[test]
    fn tier_parses_legacy_names() {
        assert_eq!("small-model".parse::<Tier>().unwrap(), Tier::Small);
        assert_eq!("LARGE".parse::<Tier>().unwrap(), Tier::Large);
        assert!("medium".parse::<Tier>().is_err());
    }

    #[test]
    fn selector_try_from_rejects_out_of_range() {
        assert_eq!(Selector::try_from(7).unwrap().value(), 7);
        assert!(Selector::try_from(16).is_err());
    }
}
