//! Tier policy
//!
//! Fast, deterministic mapping from a requested model name to the ordered
//! list of tiers to try. Pure CPU logic, no I/O.
//!
//! Rules are evaluated top-to-bottom and the first match wins. The matched
//! tier goes first, followed by every other declared tier in ascending
//! order. Unmatched names start at the primary tier instead.

use crate::backends::Tier;
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Case-insensitive model-name matcher
#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// `*`
    Any,
    /// `fast-*`
    Prefix(String),
    /// anything else
    Substring(String),
}

impl Matcher {
    fn parse(pattern: &str) -> Self {
        let lowered = pattern.trim().to_lowercase();
        if lowered == "*" {
            Self::Any
        } else if let Some(prefix) = lowered.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Substring(lowered)
        }
    }

    fn matches(&self, model: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => model.starts_with(prefix.as_str()),
            Self::Substring(needle) => model.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: String,
    matcher: Matcher,
    tier: Tier,
}

/// Maps model names to tier order
///
/// Built once from validated configuration and immutable afterwards.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    rules: Vec<CompiledRule>,
    declared: Vec<Tier>,
    primary: Tier,
}

impl TierPolicy {
    /// Build the policy from configuration
    ///
    /// # Errors
    /// Returns `AppError::Config` if a rule references an undeclared tier or
    /// no backend is declared primary.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let declared = config.declared_tiers();

        let primary = config.primary_tier().ok_or_else(|| {
            AppError::Config("no backend is declared primary; cannot build a default tier order".to_string())
        })?;

        let mut rules = Vec::with_capacity(config.routing.rules.len());
        for rule in &config.routing.rules {
            if !declared.contains(&rule.tier) {
                return Err(AppError::Config(format!(
                    "tier rule '{}' references undeclared {}",
                    rule.pattern, rule.tier
                )));
            }
            rules.push(CompiledRule {
                pattern: rule.pattern.clone(),
                matcher: Matcher::parse(&rule.pattern),
                tier: rule.tier,
            });
        }

        tracing::debug!(
            rules = rules.len(),
            declared_tiers = ?declared,
            primary = %primary,
            "Tier policy built"
        );

        Ok(Self {
            rules,
            declared,
            primary,
        })
    }

    /// Tier of the first rule matching `model`, if any
    pub fn matched_tier(&self, model: &str) -> Option<Tier> {
        let model = model.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(&model))
            .map(|rule| {
                tracing::trace!(pattern = %rule.pattern, tier = %rule.tier, "Tier rule matched");
                rule.tier
            })
    }

    /// Ordered, duplicate-free, non-empty list of tiers to try for `model`
    pub fn resolve_tiers(&self, model: &str) -> Vec<Tier> {
        let first = self.matched_tier(model).unwrap_or(self.primary);

        let mut order = Vec::with_capacity(self.declared.len());
        order.push(first);
        order.extend(self.declared.iter().copied().filter(|t| *t != first));
        order
    }

    /// Every declared tier in ascending order
    pub fn declared(&self) -> &[Tier] {
        &self.declared
    }

    /// Whether a backend is declared for `tier`
    pub fn is_declared(&self, tier: Tier) -> bool {
        self.declared.contains(&tier)
    }

    /// Default first tier for unmatched model names
    pub fn primary(&self) -> Tier {
        self.primary
    }
}
