//! Risk category classification
//!
//! Global invariants enforced:
//! - Classification is a pure function of (score, trend, anomaly flag)
//! - Rules are evaluated top-down, first match wins
//! - No memory of earlier weeks (no hysteresis)

use crate::trends::TrendLabel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk category classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Critical,
    #[serde(rename = "Emerging_Risk")]
    EmergingRisk,
    Watchlist,
    Stable,
}

impl RiskCategory {
    /// Most to least severe
    pub const ALL: [RiskCategory; 4] = [
        RiskCategory::Critical,
        RiskCategory::EmergingRisk,
        RiskCategory::Watchlist,
        RiskCategory::Stable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Critical => "Critical",
            RiskCategory::EmergingRisk => "Emerging_Risk",
            RiskCategory::Watchlist => "Watchlist",
            RiskCategory::Stable => "Stable",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configurable severity score thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RiskThresholds {
    pub critical: f64,
    pub emerging_risk: f64,
    pub watchlist: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            critical: 90.0,
            emerging_risk: 75.0,
            watchlist: 60.0,
        }
    }
}

/// Assign a risk category with default thresholds
pub fn classify_risk(score: f64, trend: TrendLabel, is_anomaly: bool) -> RiskCategory {
    classify_risk_with_thresholds(score, trend, is_anomaly, &RiskThresholds::default())
}

/// Assign a risk category with custom thresholds
///
/// 1. Critical: score >= critical, or anomalous while trending up
/// 2. Emerging_Risk: score >= emerging_risk while trending up
/// 3. Watchlist: score >= watchlist, or anomalous and not declining
/// 4. Stable otherwise
pub fn classify_risk_with_thresholds(
    score: f64,
    trend: TrendLabel,
    is_anomaly: bool,
    thresholds: &RiskThresholds,
) -> RiskCategory {
    if score >= thresholds.critical || (is_anomaly && trend.is_upward()) {
        RiskCategory::Critical
    } else if score >= thresholds.emerging_risk && trend.is_upward() {
        RiskCategory::EmergingRisk
    } else if score >= thresholds.watchlist || (is_anomaly && trend != TrendLabel::Declining) {
        RiskCategory::Watchlist
    } else {
        RiskCategory::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_rule_fires_before_trend() {
        assert_eq!(
            classify_risk(95.0, TrendLabel::Declining, false),
            RiskCategory::Critical
        );
    }

    #[test]
    fn test_emerging_risk_needs_upward_trend() {
        assert_eq!(
            classify_risk(80.0, TrendLabel::Rising, false),
            RiskCategory::EmergingRisk
        );
        assert_eq!(
            classify_risk(80.0, TrendLabel::Stable, false),
            RiskCategory::Watchlist
        );
    }

    #[test]
    fn test_anomaly_with_rising_trend_is_critical() {
        assert_eq!(
            classify_risk(10.0, TrendLabel::AcceleratingUp, true),
            RiskCategory::Critical
        );
    }

    #[test]
    fn test_anomaly_rules_respect_declining() {
        assert_eq!(
            classify_risk(10.0, TrendLabel::Stable, true),
            RiskCategory::Watchlist
        );
        // accelerating_down is not `declining`, so it still reaches Watchlist
        assert_eq!(
            classify_risk(10.0, TrendLabel::AcceleratingDown, true),
            RiskCategory::Watchlist
        );
        assert_eq!(
            classify_risk(10.0, TrendLabel::Declining, true),
            RiskCategory::Stable
        );
    }

    #[test]
    fn test_threshold_boundaries_inclusive() {
        assert_eq!(classify_risk(90.0, TrendLabel::Stable, false), RiskCategory::Critical);
        assert_eq!(classify_risk(60.0, TrendLabel::Stable, false), RiskCategory::Watchlist);
        assert_eq!(classify_risk(59.99, TrendLabel::Stable, false), RiskCategory::Stable);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = RiskThresholds {
            critical: 95.0,
            emerging_risk: 85.0,
            watchlist: 70.0,
        };
        assert_eq!(
            classify_risk_with_thresholds(92.0, TrendLabel::Rising, false, &thresholds),
            RiskCategory::EmergingRisk
        );
        assert_eq!(
            classify_risk_with_thresholds(65.0, TrendLabel::Stable, false, &thresholds),
            RiskCategory::Stable
        );
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&RiskCategory::EmergingRisk).unwrap(),
            "\"Emerging_Risk\""
        );
        assert_eq!(RiskCategory::EmergingRisk.to_string(), "Emerging_Risk");
    }
}
