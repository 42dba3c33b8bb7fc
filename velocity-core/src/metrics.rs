//! Reduction of a record set into summary statistics

use crate::record::VelocityRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

/// The three recognized velocity classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityTier {
    HighVelocityGp,
    StableButLeaking,
    HighDistress,
}

impl VelocityTier {
    pub const ALL: [VelocityTier; 3] = [
        VelocityTier::HighVelocityGp,
        VelocityTier::StableButLeaking,
        VelocityTier::HighDistress,
    ];

    /// Exact, case-sensitive match against the warehouse label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "high_velocity_gp" => Some(Self::HighVelocityGp),
            "stable_but_leaking" => Some(Self::StableButLeaking),
            "high_distress" => Some(Self::HighDistress),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighVelocityGp => "high_velocity_gp",
            Self::StableButLeaking => "stable_but_leaking",
            Self::HighDistress => "high_distress",
        }
    }

    /// Human-readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::HighVelocityGp => "High Velocity",
            Self::StableButLeaking => "Stable",
            Self::HighDistress => "Needs Help",
        }
    }
}

impl std::fmt::Display for VelocityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub high_velocity_gp: u64,
    pub stable_but_leaking: u64,
    pub high_distress: u64,
}

impl TierBreakdown {
    pub fn get(&self, tier: VelocityTier) -> u64 {
        match tier {
            VelocityTier::HighVelocityGp => self.high_velocity_gp,
            VelocityTier::StableButLeaking => self.stable_but_leaking,
            VelocityTier::HighDistress => self.high_distress,
        }
    }

    fn increment(&mut self, tier: VelocityTier) {
        match tier {
            VelocityTier::HighVelocityGp => self.high_velocity_gp += 1,
            VelocityTier::StableButLeaking => self.stable_but_leaking += 1,
            VelocityTier::HighDistress => self.high_distress += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.high_velocity_gp + self.stable_but_leaking + self.high_distress
    }
}

/// Summary of one warehouse snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityMetrics {
    pub total_companies: u64,
    pub tier_breakdown: TierBreakdown,
    pub average_capital_raised: i64,
    pub average_months_fundraising: i64,
    pub total_capital_raised: f64,
    pub last_synced_at: Option<String>,
}

/// Running sum over strictly positive values.
#[derive(Default)]
struct PositiveMean {
    sum: f64,
    count: u64,
}

impl PositiveMean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| *v > 0.0) {
            self.sum += v;
            self.count += 1;
        }
    }

    fn rounded_mean(&self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        (self.sum / self.count as f64).round() as i64
    }
}

/// Ordering for sync timestamps: parseable RFC 3339 instants outrank
/// anything else, then compare by instant, then by raw text.
fn compare_sync(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| OffsetDateTime::parse(s, &Rfc3339).ok();
    parse(a).cmp(&parse(b)).then_with(|| a.cmp(b))
}

/// Reduce records to [`VelocityMetrics`] in a single pass.
pub fn calculate_metrics(records: &[VelocityRecord]) -> VelocityMetrics {
    let mut tier_breakdown = TierBreakdown::default();
    let mut capital = PositiveMean::default();
    let mut months = PositiveMean::default();
    let mut latest_sync: Option<&str> = None;

    for record in records {
        if let Some(tier) = record.velocity_tier.as_deref().and_then(VelocityTier::from_label) {
            tier_breakdown.increment(tier);
        }

        capital.push(record.capital_raised_usd);
        months.push(record.months_fundraising);

        if let Some(synced) = record.synced_at.as_deref() {
            latest_sync = match latest_sync {
                Some(current) if compare_sync(synced, current) != Ordering::Greater => {
                    Some(current)
                }
                _ => Some(synced),
            };
        }
    }

    let metrics = VelocityMetrics {
        total_companies: records.len() as u64,
        tier_breakdown,
        average_capital_raised: capital.rounded_mean(),
        average_months_fundraising: months.rounded_mean(),
        total_capital_raised: capital.sum,
        last_synced_at: latest_sync.map(str::to_string),
    };

    debug!(
        total = metrics.total_companies,
        tiered = metrics.tier_breakdown.total(),
        "calculated velocity metrics"
    );
    metrics
}
