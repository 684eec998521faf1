//! Type-safe backend identity
//!
//! Every backend is identified by its tier number. Tiers are tried in
//! ascending order, so the number doubles as the fallback priority.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tier number of a backend (1..=3)
///
/// Construction is validated: a `Tier` outside the supported range cannot
/// exist, including when deserialized from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    /// Lowest supported tier number
    pub const MIN: u8 = 1;
    /// Highest supported tier number
    pub const MAX: u8 = 3;

    /// Create a validated tier
    ///
    /// # Errors
    /// Returns an error if `number` is outside `1..=3`.
    pub fn new(number: u8) -> Result<Self, String> {
        if (Self::MIN..=Self::MAX).contains(&number) {
            Ok(Self(number))
        } else {
            Err(format!(
                "tier must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                number
            ))
        }
    }

    /// Get the tier number
    pub fn get(self) -> u8 {
        self.0
    }

    /// Prometheus/logging label ("tier1", "tier2", "tier3")
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "tier1",
            2 => "tier2",
            _ => "tier3",
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Self::new(number)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

/// Parses "2" as well as "tier2" / "T2" (case-insensitive)
impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let digits = trimmed
            .strip_prefix("tier")
            .or_else(|| trimmed.strip_prefix('t'))
            .unwrap_or(&trimmed);
        let number: u8 = digits
            .parse()
            .map_err(|_| format!("invalid tier '{}': expected a number between 1 and 3", s))?;
        Self::new(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_accepts_supported_range() {
        for n in 1..=3 {
            assert_eq!(Tier::new(n).unwrap().get(), n);
        }
    }

    #[test]
    fn test_tier_rejects_out_of_range() {
        assert!(Tier::new(0).is_err());
        assert!(Tier::new(4).is_err());
    }

    #[test]
    fn test_tier_parses_header_forms() {
        assert_eq!("2".parse::<Tier>().unwrap().get(), 2);
        assert_eq!("tier3".parse::<Tier>().unwrap().get(), 3);
        assert_eq!("T1".parse::<Tier>().unwrap().get(), 1);
        assert!("tier9".parse::<Tier>().is_err());
        assert!("fast".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serde_validates() {
        assert_eq!(serde_json::from_str::<Tier>("1").unwrap().get(), 1);
        assert!(serde_json::from_str::<Tier>("7").is_err());
        assert_eq!(serde_json::to_string(&Tier::new(2).unwrap()).unwrap(), "2");
    }

    #[test]
    fn test_tier_ordering_is_numeric() {
        let mut tiers = vec![
            Tier::new(3).unwrap(),
            Tier::new(1).unwrap(),
            Tier::new(2).unwrap(),
        ];
        tiers.sort();
        let numbers: Vec<u8> = tiers.into_iter().map(Tier::get).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_tier_display_and_label() {
        let tier = Tier::new(2).unwrap();
        assert_eq!(tier.to_string(), "tier2");
        assert_eq!(tier.label(), "tier2");
    }
}
