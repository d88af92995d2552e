//! Risk factor aggregation
//!
//! Factors are emitted in a fixed order: amount, velocity, location, device,
//! temporal, then one factor per matched pattern in registration order.

use crate::config::FactorConfig;
use crate::patterns::{PatternEngine, PatternSet, RuleFault};
use crate::types::{AssessmentInput, FactorCategory, FraudFactor};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

/// Factors for one assessment
#[derive(Debug, Clone, Default)]
pub struct FactorAssembly {
    /// Signal factors followed by pattern factors
    pub factors: Vec<FraudFactor>,

    /// Rules that faulted during pattern evaluation
    pub rule_faults: Vec<RuleFault>,
}

/// Risk factor aggregator
pub struct RiskFactorAggregator {
    config: FactorConfig,
    patterns: Arc<PatternEngine>,
}

impl RiskFactorAggregator {
    /// Create aggregator
    pub fn new(config: FactorConfig, patterns: Arc<PatternEngine>) -> Self {
        Self { config, patterns }
    }

    /// Assemble all factors against a pattern snapshot
    pub fn assemble(
        &self,
        input: &AssessmentInput<'_>,
        patterns: &PatternSet,
        at: DateTime<Utc>,
    ) -> FactorAssembly {
        let input = input.with_night(self.config.night_window());
        let mut factors = self.base_factors(&input);
        let evaluation = self.patterns.evaluate(patterns, &input, at);
        factors.extend(evaluation.factors());

        FactorAssembly {
            factors,
            rule_faults: evaluation.faults,
        }
    }

    /// Signal factors (everything except patterns)
    pub fn base_factors(&self, input: &AssessmentInput<'_>) -> Vec<FraudFactor> {
        let input = &input.with_night(self.config.night_window());
        [
            self.amount_factor(input),
            self.velocity_factor(input),
            self.location_factor(input),
            self.device_factor(input),
            self.temporal_factor(input),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn amount_factor(&self, input: &AssessmentInput<'_>) -> Option<FraudFactor> {
        let history = input.history.filter(|h| !h.baseline.is_empty())?;
        let max = history.baseline.max_amount.to_f64().filter(|m| *m > 0.0)?;
        let ratio = input.context.amount_f64()? / max;
        if ratio <= self.config.amount_ratio_threshold {
            return None;
        }

        Some(
            FraudFactor::new(
                "amount_anomaly",
                FactorCategory::Transaction,
                self.config.weights.amount,
                (self.config.amount_impact_per_ratio * ratio).min(100.0),
            )
            .with_evidence(format!(
                "Amount {} is {:.2}x the historical max {}",
                input.context.amount, ratio, history.baseline.max_amount
            )),
        )
    }

    fn velocity_factor(&self, input: &AssessmentInput<'_>) -> Option<FraudFactor> {
        let count = input.history?.transactions_last_hour;
        if count <= self.config.velocity_cutoff {
            return None;
        }

        Some(
            FraudFactor::new(
                "velocity",
                FactorCategory::Behavioral,
                self.config.weights.velocity,
                (self.config.velocity_impact_per_transaction * count as f64).min(100.0),
            )
            .with_evidence(format!("{} transactions in the trailing window", count)),
        )
    }

    fn location_factor(&self, input: &AssessmentInput<'_>) -> Option<FraudFactor> {
        let baseline = &input.history.filter(|h| !h.baseline.is_empty())?.baseline;
        let ctx = input.context;

        let new_recipient = !baseline.knows_recipient(&ctx.recipient_id);
        let unfamiliar_country = match ctx.location.country.as_deref() {
            Some(country) if !baseline.frequent_countries.is_empty() => {
                !baseline.knows_country(country)
            }
            _ => false,
        };

        let impact = match (new_recipient, unfamiliar_country) {
            (true, true) => self.config.combined_location_impact,
            (false, true) => self.config.unfamiliar_country_impact,
            (true, false) => self.config.new_recipient_impact,
            (false, false) => return None,
        };

        let mut factor = FraudFactor::new(
            "location_anomaly",
            FactorCategory::Location,
            self.config.weights.location,
            impact,
        );
        if new_recipient {
            factor = factor.with_evidence(format!("New recipient {}", ctx.recipient_id));
        }
        if unfamiliar_country {
            factor = factor.with_evidence(format!(
                "Unfamiliar country {}",
                ctx.location.country.as_deref().unwrap_or_default()
            ));
        }
        Some(factor)
    }

    fn device_factor(&self, input: &AssessmentInput<'_>) -> Option<FraudFactor> {
        let device = input.device?;
        if device.risk_score <= self.config.device_score_threshold {
            return None;
        }

        let mut factor = FraudFactor::new(
            "device_risk",
            FactorCategory::Device,
            self.config.weights.device,
            device.risk_score * 100.0,
        );
        for signal in &device.signals {
            factor = factor.with_evidence(signal.as_str());
        }
        Some(factor)
    }

    fn temporal_factor(&self, input: &AssessmentInput<'_>) -> Option<FraudFactor> {
        if !input.is_night() {
            return None;
        }
        let hour = input.context.local_hour();

        Some(
            FraudFactor::new(
                "unusual_hour",
                FactorCategory::Temporal,
                self.config.weights.temporal,
                self.config.temporal_impact,
            )
            .with_evidence(format!("Local hour {:02}", hour)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::{fixtures, DeviceTrustRegistry, InMemoryDeviceStore};
    use crate::history::{HistorySummary, UserHistory};
    use crate::types::fixtures::context;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn aggregator() -> RiskFactorAggregator {
        RiskFactorAggregator::new(FactorConfig::default(), Arc::new(PatternEngine::new()))
    }

    fn history(max: i64, recent: u32) -> UserHistory {
        UserHistory {
            baseline: HistorySummary {
                transaction_count: 30,
                avg_amount: Decimal::from(400),
                max_amount: Decimal::from(max),
                frequent_recipients: vec!["friend-1".to_string()],
                frequent_countries: vec!["US".to_string()],
            },
            transactions_last_hour: recent,
        }
    }

    fn names(factors: &[FraudFactor]) -> Vec<&str> {
        factors.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_amount_factor() {
        let ctx = context(1_500);
        let h = history(500, 0);
        let input = AssessmentInput::new(&ctx, Some(&h), None);

        let factors = aggregator().base_factors(&input);
        assert_eq!(names(&factors), vec!["amount_anomaly"]);
        assert_eq!(factors[0].impact, 45.0);
        assert_eq!(factors[0].weight, 0.8);

        // At exactly 1.5x nothing fires
        let ctx = context(750);
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        assert!(aggregator().base_factors(&input).is_empty());
    }

    #[test]
    fn test_velocity_factor() {
        let ctx = context(100);
        let h = history(500, 11);
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        let factors = aggregator().base_factors(&input);
        assert_eq!(names(&factors), vec!["velocity"]);
        assert_eq!(factors[0].impact, 88.0);

        let h = history(500, 5);
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        assert!(aggregator().base_factors(&input).is_empty());

        let h = history(500, 20);
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        assert_eq!(aggregator().base_factors(&input)[0].impact, 100.0);
    }

    #[test]
    fn test_location_impacts() {
        let h = history(500, 0);

        let mut ctx = context(100);
        ctx.recipient_id = "stranger".to_string();
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        assert_eq!(aggregator().base_factors(&input)[0].impact, 35.0);

        let mut ctx = context(100);
        ctx.location.country = Some("RU".to_string());
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        assert_eq!(aggregator().base_factors(&input)[0].impact, 55.0);

        ctx.recipient_id = "stranger".to_string();
        let input = AssessmentInput::new(&ctx, Some(&h), None);
        let factors = aggregator().base_factors(&input);
        assert_eq!(factors[0].impact, 70.0);
        assert_eq!(factors[0].evidence.len(), 2);
    }

    #[test]
    fn test_history_factors_skipped_without_history() {
        let mut ctx = context(10_000);
        ctx.recipient_id = "stranger".to_string();

        let input = AssessmentInput::new(&ctx, None, None);
        assert!(aggregator().base_factors(&input).is_empty());

        // New user: empty summary, no amount or location comparison
        let empty = UserHistory::default();
        let input = AssessmentInput::new(&ctx, Some(&empty), None);
        assert!(aggregator().base_factors(&input).is_empty());
    }

    #[test]
    fn test_device_factor() {
        let registry =
            DeviceTrustRegistry::new(Arc::new(InMemoryDeviceStore::new()), DeviceConfig::default());
        let ctx = context(100);

        let scripted = registry.observe(&fixtures::scripted_fingerprint("bot"), None, Utc::now());
        let input = AssessmentInput::new(&ctx, None, Some(&scripted));
        let factors = aggregator().base_factors(&input);
        assert_eq!(names(&factors), vec!["device_risk"]);
        assert!((factors[0].impact - 90.0).abs() < 1e-9);
        assert_eq!(factors[0].evidence.len(), 4);

        let nominal = registry.observe(&fixtures::nominal_fingerprint("phone"), None, Utc::now());
        let input = AssessmentInput::new(&ctx, None, Some(&nominal));
        assert!(aggregator().base_factors(&input).is_empty());
    }

    #[test]
    fn test_temporal_window() {
        let mut ctx = context(100);
        let agg = aggregator();

        for (hour, fires) in [(0, true), (5, true), (6, false), (22, false), (23, true)] {
            ctx.timestamp = Utc.with_ymd_and_hms(2024, 3, 12, hour, 0, 0).unwrap();
            let input = AssessmentInput::new(&ctx, None, None);
            assert_eq!(!agg.base_factors(&input).is_empty(), fires, "hour {}", hour);
        }
    }

    #[test]
    fn test_tuned_night_window_reaches_rules() {
        use crate::patterns::{Comparison, Condition, Field, FraudPattern, FraudRule};
        use crate::types::RiskLevel;

        let engine = Arc::new(PatternEngine::new());
        engine
            .upsert_pattern(FraudPattern::new("late", "Late transfer", RiskLevel::Medium).rule(
                FraudRule::new(
                    "late_any",
                    "Any transfer at night",
                    Condition::compare(Field::NightTime, Comparison::Eq, 1.0),
                    1.0,
                    1.0,
                ),
            ))
            .unwrap();

        let config = FactorConfig {
            night_start_hour: 20,
            night_end_hour: 7,
            ..FactorConfig::default()
        };
        let agg = RiskFactorAggregator::new(config, Arc::clone(&engine));

        let mut ctx = context(100);
        for (hour, night) in [(21, true), (6, true), (20, false), (7, false), (14, false)] {
            ctx.timestamp = Utc.with_ymd_and_hms(2024, 3, 12, hour, 30, 0).unwrap();
            let input = AssessmentInput::new(&ctx, None, None);
            let assembly = agg.assemble(&input, &engine.snapshot(), ctx.timestamp);

            let expected = if night {
                vec!["unusual_hour", "pattern:late"]
            } else {
                vec![]
            };
            assert_eq!(names(&assembly.factors), expected, "hour {}", hour);
        }
    }

    #[test]
    fn test_stable_order_with_patterns() {
        let engine = Arc::new(PatternEngine::with_defaults().unwrap());
        let agg = RiskFactorAggregator::new(FactorConfig::default(), Arc::clone(&engine));

        let mut ctx = context(600);
        ctx.recipient_id = "stranger".to_string();
        ctx.timestamp = Utc.with_ymd_and_hms(2024, 3, 12, 2, 0, 0).unwrap();
        let h = history(300, 0);
        let input = AssessmentInput::new(&ctx, Some(&h), None);

        let assembly = agg.assemble(&input, &engine.snapshot(), ctx.timestamp);
        assert_eq!(
            names(&assembly.factors),
            vec!["amount_anomaly", "location_anomaly", "unusual_hour", "pattern:night_drain"]
        );
        assert!(assembly.rule_faults.is_empty());
    }
}
