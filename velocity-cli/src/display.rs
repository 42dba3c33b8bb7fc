//! Human-readable rendering of velocity metrics

use colored::Colorize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use velocity_core::{VelocityMetrics, VelocityRecord, VelocityTier};

/// Compact USD: `$1.2B`, `$3.4M`, `$500K`, `$12`.
pub fn format_usd(amount: f64) -> String {
    if amount >= 1_000_000_000.0 {
        format!("${:.1}B", amount / 1_000_000_000.0)
    } else if amount >= 1_000_000.0 {
        format!("${:.1}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("${:.0}K", amount / 1_000.0)
    } else {
        format!("${:.0}", amount)
    }
}

/// "Just now", "5m ago", "3h ago", "2d ago", or "Unknown".
pub fn relative_time(iso: Option<&str>, now: OffsetDateTime) -> String {
    let Some(then) = iso.and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()) else {
        return "Unknown".to_string();
    };
    let mins = (now - then).whole_minutes();
    let hours = mins / 60;
    let days = hours / 24;

    if mins < 1 {
        "Just now".to_string()
    } else if mins < 60 {
        format!("{}m ago", mins)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", days)
    }
}

/// Share of all companies in each tier, as a rounded percentage.
pub fn tier_percentages(metrics: &VelocityMetrics) -> Vec<(VelocityTier, u64, u64)> {
    let total = metrics.total_companies.max(1) as f64;
    VelocityTier::ALL
        .iter()
        .map(|&tier| {
            let count = metrics.tier_breakdown.get(tier);
            (tier, count, (count as f64 / total * 100.0).round() as u64)
        })
        .collect()
}

fn colored_tier(tier: VelocityTier) -> colored::ColoredString {
    let name = tier.display_name();
    match tier {
        VelocityTier::HighVelocityGp => name.green(),
        VelocityTier::StableButLeaking => name.yellow(),
        VelocityTier::HighDistress => name.red(),
    }
}

pub fn print_metrics(metrics: &VelocityMetrics, now: OffsetDateTime) {
    println!(
        "{}: {} fund managers",
        "Companies".blue(),
        metrics.total_companies
    );
    for (tier, count, pct) in tier_percentages(metrics) {
        println!("  {:<14} {:>5}  {:>3}%", colored_tier(tier), count, pct);
    }
    println!(
        "{}: {} total, {} average",
        "Capital raised".blue(),
        format_usd(metrics.total_capital_raised),
        format_usd(metrics.average_capital_raised as f64)
    );
    println!(
        "{}: {} months average",
        "Fundraising".blue(),
        metrics.average_months_fundraising
    );
    println!(
        "{}: {}",
        "Last sync".blue(),
        relative_time(metrics.last_synced_at.as_deref(), now)
    );
}

/// `total` is the row count reported alongside the records.
pub fn print_records(records: &[VelocityRecord], total: usize) {
    for record in records {
        let tier = record.velocity_tier.as_deref().unwrap_or("-");
        let capital = record
            .capital_raised_usd
            .map(format_usd)
            .unwrap_or_else(|| "-".to_string());
        let months = record
            .months_fundraising
            .map(|m| format!("{}mo", m))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<20} {:<20} {:>10} {:>8}", record.id, tier, capital, months);
    }
    println!("{}: {} records", "Total".green(), total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use velocity_core::TierBreakdown;

    #[test]
    fn usd_is_compact() {
        assert_eq!(format_usd(1_234_000_000.0), "$1.2B");
        assert_eq!(format_usd(3_400_000.0), "$3.4M");
        assert_eq!(format_usd(500_000.0), "$500K");
        assert_eq!(format_usd(12.0), "$12");
        assert_eq!(format_usd(0.0), "$0");
    }

    #[test]
    fn relative_time_buckets() {
        let now = OffsetDateTime::parse("2024-06-10T12:00:00Z", &Rfc3339).unwrap();
        assert_eq!(relative_time(None, now), "Unknown");
        assert_eq!(relative_time(Some("garbage"), now), "Unknown");
        assert_eq!(relative_time(Some("2024-06-10T11:59:30Z"), now), "Just now");
        assert_eq!(relative_time(Some("2024-06-10T11:55:00Z"), now), "5m ago");
        assert_eq!(relative_time(Some("2024-06-10T09:00:00Z"), now), "3h ago");
        assert_eq!(relative_time(Some("2024-06-08T12:00:00Z"), now), "2d ago");
    }

    #[test]
    fn percentages_use_total_companies() {
        let metrics = VelocityMetrics {
            total_companies: 8,
            tier_breakdown: TierBreakdown {
                high_velocity_gp: 1,
                stable_but_leaking: 2,
                high_distress: 4,
            },
            ..Default::default()
        };
        let pct: Vec<u64> = tier_percentages(&metrics).iter().map(|t| t.2).collect();
        assert_eq!(pct, vec![13, 25, 50]);

        let empty = tier_percentages(&VelocityMetrics::default());
        assert!(empty.iter().all(|t| t.2 == 0));
    }
}
