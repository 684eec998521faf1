//! Routing logic for tierroute
//!
//! - [`policy`]: maps a requested model name to an ordered list of tiers
//! - [`dispatch`]: tries those tiers in order and returns the first success
//!
//! This module also holds the per-request [`RoutingOutcome`] record.

pub mod dispatch;
pub mod policy;

pub use dispatch::{Route, Routed, TierRouter};
pub use policy::TierPolicy;

use crate::backends::Tier;
use crate::error::BackendError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What happened when the router considered one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Backend answered; its response was returned to the client
    Succeeded,
    /// Backend was not contacted (health monitor reports it down)
    Skipped(BackendError),
    /// Backend was contacted and failed
    Failed(BackendError),
}

impl AttemptOutcome {
    /// Label used in logs, metrics and error payloads
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// The error behind a skipped or failed attempt
    pub fn error(&self) -> Option<&BackendError> {
        match self {
            Self::Succeeded => None,
            Self::Skipped(e) | Self::Failed(e) => Some(e),
        }
    }
}

/// One entry of a [`RoutingOutcome`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub tier: Tier,
    pub backend: String,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

/// Serializable view of an attempt for client-facing error payloads
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub tier: u8,
    pub backend: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub latency_ms: u64,
}

/// Ordered record of every backend considered for one request
///
/// Produced once per request, logged, and discarded. When no backend
/// succeeds it becomes the payload of `AppError::Exhausted`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOutcome {
    chosen: Option<Tier>,
    attempts: Vec<AttemptRecord>,
}

impl RoutingOutcome {
    /// Append an attempt; a success also sets the chosen backend
    pub fn record(
        &mut self,
        tier: Tier,
        backend: &str,
        outcome: AttemptOutcome,
        latency: Duration,
    ) {
        if outcome == AttemptOutcome::Succeeded {
            self.chosen = Some(tier);
        }
        self.attempts.push(AttemptRecord {
            tier,
            backend: backend.to_string(),
            outcome,
            latency,
        });
    }

    /// Tier whose response was returned, if any
    pub fn chosen(&self) -> Option<Tier> {
        self.chosen
    }

    /// Attempts in the order they were made
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Client-facing attempt list
    pub fn report(&self) -> Vec<AttemptReport> {
        self.attempts
            .iter()
            .map(|a| AttemptReport {
                tier: a.tier.get(),
                backend: a.backend.clone(),
                outcome: a.outcome.label(),
                error_kind: a.outcome.error().map(BackendError::kind),
                reason: a.outcome.error().map(ToString::to_string),
                latency_ms: a.latency.as_millis() as u64,
            })
            .collect()
    }
}

impl fmt::Display for RoutingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no backends attempted");
        }
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({}): ", attempt.tier, attempt.backend)?;
            match &attempt.outcome {
                AttemptOutcome::Succeeded => write!(f, "succeeded")?,
                AttemptOutcome::Skipped(e) => write!(f, "skipped ({})", e)?,
                AttemptOutcome::Failed(e) => write!(f, "{}", e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(n: u8) -> Tier {
        Tier::new(n).unwrap()
    }

    #[test]
    fn test_outcome_records_in_order_and_sets_chosen() {
        let mut outcome = RoutingOutcome::default();
        outcome.record(
            tier(1),
            "a",
            AttemptOutcome::Skipped(BackendError::Unavailable {
                backend: "a".to_string(),
            }),
            Duration::ZERO,
        );
        assert_eq!(outcome.chosen(), None);

        outcome.record(tier(2), "b", AttemptOutcome::Succeeded, Duration::from_millis(12));
        assert_eq!(outcome.chosen(), Some(tier(2)));

        let labels: Vec<_> = outcome.attempts().iter().map(|a| a.outcome.label()).collect();
        assert_eq!(labels, vec!["skipped", "succeeded"]);
    }

    #[test]
    fn test_report_carries_kind_and_reason() {
        let mut outcome = RoutingOutcome::default();
        outcome.record(
            tier(3),
            "hosted",
            AttemptOutcome::Failed(BackendError::Timeout {
                backend: "hosted".to_string(),
                seconds: 5,
            }),
            Duration::from_millis(5_000),
        );

        let report = outcome.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].tier, 3);
        assert_eq!(report[0].outcome, "failed");
        assert_eq!(report[0].error_kind, Some("timeout"));
        assert_eq!(report[0].latency_ms, 5_000);
        assert!(report[0].reason.as_deref().unwrap().contains("5s"));
    }

    #[test]
    fn test_display_names_each_attempt() {
        let mut outcome = RoutingOutcome::default();
        outcome.record(
            tier(1),
            "ollama",
            AttemptOutcome::Failed(BackendError::status("ollama", 500, "oops")),
            Duration::ZERO,
        );
        let text = outcome.to_string();
        assert!(text.starts_with("tier1 (ollama): "));
        assert!(text.contains("HTTP 500"));
    }
}
