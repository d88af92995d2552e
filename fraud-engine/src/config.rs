//! Configuration for the fraud engine

use crate::types::NightWindow;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service name
    pub service_name: String,

    /// Default per-assessment deadline (milliseconds)
    pub deadline_ms: u64,

    /// Register the built-in pattern library at startup
    pub load_default_patterns: bool,

    /// Extra patterns loaded at startup (TOML or JSON)
    pub patterns_file: Option<PathBuf>,

    /// History lookup windows
    pub history: HistoryConfig,

    /// Factor thresholds and weights
    pub factors: FactorConfig,

    /// Device suspicion increments
    pub device: DeviceConfig,

    /// Scoring and degradation settings
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "fraud-engine".to_string(),
            deadline_ms: 250,
            load_default_patterns: true,
            patterns_file: None,
            history: HistoryConfig::default(),
            factors: FactorConfig::default(),
            device: DeviceConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

/// History lookup windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Baseline window for averages and frequent sets (days)
    pub baseline_window_days: i64,

    /// Trailing velocity window (minutes)
    pub velocity_window_minutes: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            baseline_window_days: 90,
            velocity_window_minutes: 60,
        }
    }
}

/// Per-factor weights. Static today; a learned model can populate the same type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    /// Amount anomaly weight
    pub amount: f64,

    /// Velocity weight
    pub velocity: f64,

    /// Location anomaly weight
    pub location: f64,

    /// Device risk weight
    pub device: f64,

    /// Unusual hour weight
    pub temporal: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            amount: 0.8,
            velocity: 0.9,
            location: 0.6,
            device: 0.7,
            temporal: 0.4,
        }
    }
}

impl FactorWeights {
    fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("amount", self.amount),
            ("velocity", self.velocity),
            ("location", self.location),
            ("device", self.device),
            ("temporal", self.temporal),
        ] {
            check_unit(&format!("factors.weights.{}", name), weight)?;
        }
        Ok(())
    }
}

/// Factor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    /// Amount factor fires above this multiple of the historical max
    pub amount_ratio_threshold: f64,

    /// Impact per unit of amount/max ratio
    pub amount_impact_per_ratio: f64,

    /// Velocity factor fires above this many transactions in the window
    pub velocity_cutoff: u32,

    /// Impact per transaction in the velocity window
    pub velocity_impact_per_transaction: f64,

    /// Device factor fires above this registry score
    pub device_score_threshold: f64,

    /// Local hours after this one are night (exclusive); wraps past
    /// midnight when greater than `night_end_hour`
    pub night_start_hour: u32,

    /// Local hours before this one are night (exclusive)
    pub night_end_hour: u32,

    /// Impact for a new recipient alone
    pub new_recipient_impact: f64,

    /// Impact for an unfamiliar country alone
    pub unfamiliar_country_impact: f64,

    /// Impact when both location signals are present
    pub combined_location_impact: f64,

    /// Impact of a night-time transaction
    pub temporal_impact: f64,

    /// Factor weights
    pub weights: FactorWeights,
}

impl FactorConfig {
    /// Configured off-hours window
    pub fn night_window(&self) -> NightWindow {
        NightWindow::new(self.night_start_hour, self.night_end_hour)
    }
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            amount_ratio_threshold: 1.5,
            amount_impact_per_ratio: 15.0,
            velocity_cutoff: 5,
            velocity_impact_per_transaction: 8.0,
            device_score_threshold: 0.7,
            night_start_hour: 22,
            night_end_hour: 6,
            new_recipient_impact: 35.0,
            unfamiliar_country_impact: 55.0,
            combined_location_impact: 70.0,
            temporal_impact: 30.0,
            weights: FactorWeights::default(),
        }
    }
}

/// Device suspicion increments and detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device not enrolled
    pub untrusted_increment: f64,

    /// Browser outside `known_browsers`
    pub unrecognized_browser_increment: f64,

    /// OS outside `known_operating_systems`
    pub unrecognized_os_increment: f64,

    /// Cores or memory at or below the low-end limits
    pub low_end_hardware_increment: f64,

    /// Connection type missing or unrecognised
    pub unresolved_network_increment: f64,

    /// Interaction timing too regular
    pub automation_increment: f64,

    /// Lowercase browser families considered recognized
    pub known_browsers: Vec<String>,

    /// Lowercase OS families considered recognized
    pub known_operating_systems: Vec<String>,

    /// Hardware at or below this core count is low-end
    pub low_end_max_cores: u32,

    /// Hardware at or below this memory is low-end
    pub low_end_max_memory_gb: f64,

    /// Minimum interaction samples before timing is judged
    pub automation_min_samples: usize,

    /// Coefficient of variation below which timing looks scripted
    pub automation_max_variation: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            untrusted_increment: 0.2,
            unrecognized_browser_increment: 0.2,
            unrecognized_os_increment: 0.1,
            low_end_hardware_increment: 0.1,
            unresolved_network_increment: 0.2,
            automation_increment: 0.3,
            known_browsers: ["chrome", "safari", "firefox", "edge", "samsung", "opera"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            known_operating_systems: ["android", "ios", "windows", "macos", "linux"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            low_end_max_cores: 2,
            low_end_max_memory_gb: 2.0,
            automation_min_samples: 5,
            automation_max_variation: 0.1,
        }
    }
}

/// Scoring and degradation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Confidence reported when no factor fired
    pub neutral_confidence: f64,

    /// Confidence multiplier per unavailable collaborator
    pub unavailable_confidence_factor: f64,

    /// Score returned when every collaborator is unavailable (must bin as high)
    pub conservative_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            neutral_confidence: 0.5,
            unavailable_confidence_factor: 0.5,
            conservative_score: 60.0,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("FRAUD_ENGINE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => EngineConfig::default(),
        };

        if let Ok(deadline) = std::env::var("FRAUD_ENGINE_DEADLINE_MS") {
            config.deadline_ms = deadline.parse().map_err(|e| {
                Error::InvalidConfig(format!("FRAUD_ENGINE_DEADLINE_MS: {}", e))
            })?;
        }

        if let Ok(path) = std::env::var("FRAUD_ENGINE_PATTERNS_FILE") {
            config.patterns_file = Some(PathBuf::from(path));
        }

        if let Ok(flag) = std::env::var("FRAUD_ENGINE_LOAD_DEFAULT_PATTERNS") {
            config.load_default_patterns = flag.parse().map_err(|e| {
                Error::InvalidConfig(format!("FRAUD_ENGINE_LOAD_DEFAULT_PATTERNS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Default deadline as a duration
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Reject values the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.deadline_ms == 0 {
            return Err(Error::InvalidConfig("deadline_ms must be positive".to_string()));
        }
        if self.history.baseline_window_days <= 0 || self.history.velocity_window_minutes <= 0 {
            return Err(Error::InvalidConfig("history windows must be positive".to_string()));
        }

        let factors = &self.factors;
        factors.weights.validate()?;
        if factors.amount_ratio_threshold <= 1.0 || !factors.amount_ratio_threshold.is_finite() {
            return Err(Error::InvalidConfig(
                "factors.amount_ratio_threshold must be greater than 1".to_string(),
            ));
        }
        check_unit("factors.device_score_threshold", factors.device_score_threshold)?;
        factors.night_window().validate()?;
        for (name, impact) in [
            ("amount_impact_per_ratio", factors.amount_impact_per_ratio),
            ("velocity_impact_per_transaction", factors.velocity_impact_per_transaction),
            ("new_recipient_impact", factors.new_recipient_impact),
            ("unfamiliar_country_impact", factors.unfamiliar_country_impact),
            ("combined_location_impact", factors.combined_location_impact),
            ("temporal_impact", factors.temporal_impact),
        ] {
            if !(0.0..=100.0).contains(&impact) {
                return Err(Error::InvalidConfig(format!(
                    "factors.{} must be within 0-100, got {}",
                    name, impact
                )));
            }
        }

        let device = &self.device;
        for (name, increment) in [
            ("untrusted_increment", device.untrusted_increment),
            ("unrecognized_browser_increment", device.unrecognized_browser_increment),
            ("unrecognized_os_increment", device.unrecognized_os_increment),
            ("low_end_hardware_increment", device.low_end_hardware_increment),
            ("unresolved_network_increment", device.unresolved_network_increment),
            ("automation_increment", device.automation_increment),
        ] {
            check_unit(&format!("device.{}", name), increment)?;
        }
        if device.untrusted_increment <= 0.0 {
            return Err(Error::InvalidConfig(
                "device.untrusted_increment must be positive".to_string(),
            ));
        }

        let scoring = &self.scoring;
        check_unit("scoring.neutral_confidence", scoring.neutral_confidence)?;
        if !(0.0..1.0).contains(&scoring.unavailable_confidence_factor) {
            return Err(Error::InvalidConfig(
                "scoring.unavailable_confidence_factor must be within [0, 1)".to_string(),
            ));
        }
        if !(60.0..80.0).contains(&scoring.conservative_score) {
            return Err(Error::InvalidConfig(
                "scoring.conservative_score must bin as high (60-80)".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidConfig(format!(
            "{} must be within 0-1, got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.service_name, "fraud-engine");
        assert_eq!(config.deadline(), Duration::from_millis(250));
        assert!(config.load_default_patterns);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            deadline_ms = 100

            [factors.weights]
            velocity = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.deadline_ms, 100);
        assert_eq!(config.factors.weights.velocity, 0.5);
        assert_eq!(config.factors.weights.amount, 0.8);
        assert_eq!(config.factors.velocity_cutoff, 5);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let mut config = EngineConfig::default();
        config.factors.weights.device = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_night_window_bounds() {
        let mut config = EngineConfig::default();
        let window = config.factors.night_window();
        assert!(window.contains(23) && window.contains(0) && window.contains(5));
        assert!(!window.contains(22) && !window.contains(6) && !window.contains(14));

        // Same-day window
        config.factors.night_start_hour = 2;
        config.factors.night_end_hour = 4;
        assert!(config.validate().is_ok());
        let window = config.factors.night_window();
        assert!(window.contains(3));
        assert!(!window.contains(14) && !window.contains(2) && !window.contains(4));

        for (start, end) in [(5, 5), (5, 6), (23, 0), (24, 6)] {
            config.factors.night_start_hour = start;
            config.factors.night_end_hour = end;
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "{} -> {} accepted",
                start,
                end
            );
        }
    }

    #[test]
    fn test_conservative_score_must_be_high() {
        let mut config = EngineConfig::default();
        config.scoring.conservative_score = 45.0;
        assert!(config.validate().is_err());
    }
}
