//! Configuration file support
//!
//! Loads engine parameters from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.ewsrc.json` in the working directory
//! 3. `ews.config.json` in the working directory
//!
//! All fields are optional; anything left out keeps its documented default.

use crate::anomaly::AnomalyParams;
use crate::forecast::ForecastParams;
use crate::risk::RiskThresholds;
use crate::trends::TrendThresholds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: [&str; 2] = [".ewsrc.json", "ews.config.json"];

/// Engine configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EwsConfig {
    #[serde(default)]
    pub anomaly: Option<AnomalyConfig>,

    #[serde(default)]
    pub trend: Option<TrendConfig>,

    #[serde(default)]
    pub risk: Option<RiskConfig>,

    #[serde(default)]
    pub forecast: Option<ForecastConfig>,
}

/// Anomaly detector settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnomalyConfig {
    /// Expected anomalous fraction (default: 0.10)
    pub contamination: Option<f64>,
    /// Weeks of history before a district is scored (default: 5)
    pub min_history_weeks: Option<usize>,
    /// Random seed (default: 42)
    pub seed: Option<u64>,
    /// Number of isolation trees (default: 100)
    pub trees: Option<usize>,
    /// Subsample size per tree (default: 256)
    pub max_samples: Option<usize>,
}

/// Trend label thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendConfig {
    /// Change above which a positive-momentum week accelerates (default: 5)
    pub accelerating_change: Option<f64>,
    /// Change above which a week is rising (default: 3)
    pub rising_change: Option<f64>,
    /// Change below which a week is declining (default: -5)
    pub declining_change: Option<f64>,
}

/// Risk category score thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Default: 90
    pub critical: Option<f64>,
    /// Default: 75
    pub emerging_risk: Option<f64>,
    /// Default: 60
    pub watchlist: Option<f64>,
}

/// Forecaster settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForecastConfig {
    /// Trailing rows averaged (default: 4)
    pub window: Option<usize>,
    /// Weeks ahead of the last observed week (default: 2)
    pub horizon_weeks: Option<u32>,
    /// Score multiplier for upward trends (default: 1.10)
    pub rising_multiplier: Option<f64>,
    /// Score multiplier for downward trends (default: 0.90)
    pub declining_multiplier: Option<f64>,
}

/// Fully resolved, immutable engine parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResolvedConfig {
    pub anomaly: AnomalyParams,
    pub trend: TrendThresholds,
    pub risk: RiskThresholds,
    pub forecast: ForecastParams,
    /// Path the config was loaded from (None if defaults)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
}

impl EwsConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        let resolved = self.merged();

        let a = &resolved.anomaly;
        if !(a.contamination > 0.0 && a.contamination <= 0.5) {
            anyhow::bail!(
                "anomaly.contamination must be in (0, 0.5] (got {})",
                a.contamination
            );
        }
        if a.min_history_weeks < 1 {
            anyhow::bail!("anomaly.min_history_weeks must be at least 1");
        }
        if a.trees < 1 {
            anyhow::bail!("anomaly.trees must be at least 1");
        }
        if a.max_samples < 2 {
            anyhow::bail!("anomaly.max_samples must be at least 2 (got {})", a.max_samples);
        }

        let t = &resolved.trend;
        if t.rising_change <= 0.0 {
            anyhow::bail!("trend.rising_change must be positive (got {})", t.rising_change);
        }
        if t.accelerating_change < t.rising_change {
            anyhow::bail!(
                "trend.accelerating_change ({}) must be at least trend.rising_change ({})",
                t.accelerating_change,
                t.rising_change
            );
        }
        if t.declining_change >= 0.0 {
            anyhow::bail!(
                "trend.declining_change must be negative (got {})",
                t.declining_change
            );
        }

        let r = &resolved.risk;
        for (name, value) in [
            ("critical", r.critical),
            ("emerging_risk", r.emerging_risk),
            ("watchlist", r.watchlist),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("risk.{} must be in [0, 100] (got {})", name, value);
            }
        }
        if r.watchlist >= r.emerging_risk {
            anyhow::bail!(
                "risk.watchlist ({}) must be less than risk.emerging_risk ({})",
                r.watchlist,
                r.emerging_risk
            );
        }
        if r.emerging_risk >= r.critical {
            anyhow::bail!(
                "risk.emerging_risk ({}) must be less than risk.critical ({})",
                r.emerging_risk,
                r.critical
            );
        }

        let f = &resolved.forecast;
        if f.window < 1 {
            anyhow::bail!("forecast.window must be at least 1");
        }
        if f.horizon_weeks < 1 {
            anyhow::bail!("forecast.horizon_weeks must be at least 1");
        }
        for (name, value) in [
            ("rising_multiplier", f.rising_multiplier),
            ("declining_multiplier", f.declining_multiplier),
        ] {
            if value <= 0.0 || !value.is_finite() {
                anyhow::bail!("forecast.{} must be positive (got {})", name, value);
            }
        }
        if f.rising_multiplier < 1.0 {
            anyhow::bail!(
                "forecast.rising_multiplier must be at least 1.0 (got {})",
                f.rising_multiplier
            );
        }
        if f.declining_multiplier > 1.0 {
            anyhow::bail!(
                "forecast.declining_multiplier must be at most 1.0 (got {})",
                f.declining_multiplier
            );
        }

        Ok(())
    }

    /// Resolve config into the parameter structs used by the engine
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;
        Ok(self.merged())
    }

    fn merged(&self) -> ResolvedConfig {
        let mut anomaly = AnomalyParams::default();
        if let Some(a) = &self.anomaly {
            anomaly.contamination = a.contamination.unwrap_or(anomaly.contamination);
            anomaly.min_history_weeks = a.min_history_weeks.unwrap_or(anomaly.min_history_weeks);
            anomaly.seed = a.seed.unwrap_or(anomaly.seed);
            anomaly.trees = a.trees.unwrap_or(anomaly.trees);
            anomaly.max_samples = a.max_samples.unwrap_or(anomaly.max_samples);
        }

        let mut trend = TrendThresholds::default();
        if let Some(t) = &self.trend {
            trend.accelerating_change = t.accelerating_change.unwrap_or(trend.accelerating_change);
            trend.rising_change = t.rising_change.unwrap_or(trend.rising_change);
            trend.declining_change = t.declining_change.unwrap_or(trend.declining_change);
        }

        let mut risk = RiskThresholds::default();
        if let Some(r) = &self.risk {
            risk.critical = r.critical.unwrap_or(risk.critical);
            risk.emerging_risk = r.emerging_risk.unwrap_or(risk.emerging_risk);
            risk.watchlist = r.watchlist.unwrap_or(risk.watchlist);
        }

        let mut forecast = ForecastParams::default();
        if let Some(f) = &self.forecast {
            forecast.window = f.window.unwrap_or(forecast.window);
            forecast.horizon_weeks = f.horizon_weeks.unwrap_or(forecast.horizon_weeks);
            forecast.rising_multiplier = f.rising_multiplier.unwrap_or(forecast.rising_multiplier);
            forecast.declining_multiplier =
                f.declining_multiplier.unwrap_or(forecast.declining_multiplier);
        }

        ResolvedConfig {
            anomaly,
            trend,
            risk,
            forecast,
            config_path: None,
        }
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Self {
        ResolvedConfig::default()
    }
}

/// Discover and load a config file from `root`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(EwsConfig, PathBuf)>> {
    for name in CONFIG_FILE_NAMES {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<EwsConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: EwsConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (EwsConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
