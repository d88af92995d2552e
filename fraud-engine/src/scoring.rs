//! Risk scoring and decision policy

use crate::config::ScoringConfig;
use crate::types::{FraudFactor, RecommendedAction, RiskLevel, RiskScore};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Scorer output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// Weighted score
    pub risk_score: RiskScore,

    /// Bin of the score
    pub risk_level: RiskLevel,

    /// Confidence after degradation (0-1)
    pub confidence: f64,
}

/// Risk scorer
///
/// The score is the weight-normalised mean of factor impacts, not a sum, so
/// adding a factor can lower the score when its impact is below the current
/// mean.
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    /// Create new risk scorer
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a factor list with every collaborator available
    pub fn score(&self, factors: &[FraudFactor]) -> ScoreOutcome {
        self.degraded(factors, 0)
    }

    /// Score a factor list with `unavailable` collaborators missing
    pub fn degraded(&self, factors: &[FraudFactor], unavailable: usize) -> ScoreOutcome {
        let risk_score = RiskScore::new(weighted_mean(factors));
        ScoreOutcome {
            risk_score,
            risk_level: risk_score.level(),
            confidence: self.penalise(self.confidence(factors), unavailable),
        }
    }

    /// Fixed high-risk outcome used when no collaborator answered.
    ///
    /// `factors` are the ones still computable without collaborators. They do
    /// not move the score; confidence starts from the lower of their
    /// confidence and the neutral value before the unavailability penalty.
    pub fn conservative(&self, factors: &[FraudFactor], unavailable: usize) -> ScoreOutcome {
        let risk_score = RiskScore::new(self.config.conservative_score);
        let confidence = self
            .confidence(factors)
            .min(self.config.neutral_confidence);
        ScoreOutcome {
            risk_score,
            risk_level: risk_score.level(),
            confidence: self.penalise(confidence, unavailable),
        }
    }

    /// (mean weight + mean impact / 100) / 2, neutral for an empty list
    pub fn confidence(&self, factors: &[FraudFactor]) -> f64 {
        if factors.is_empty() {
            return self.config.neutral_confidence;
        }

        let n = factors.len() as f64;
        let mean_weight = factors.iter().map(|f| f.weight).sum::<f64>() / n;
        let mean_impact = factors.iter().map(|f| f.impact).sum::<f64>() / n;
        ((mean_weight + mean_impact / 100.0) / 2.0).clamp(0.0, 1.0)
    }

    fn penalise(&self, confidence: f64, unavailable: usize) -> f64 {
        let penalty = self
            .config
            .unavailable_confidence_factor
            .powi(unavailable as i32);
        (confidence * penalty).clamp(0.0, 1.0)
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

/// Σ(weight × impact) / Σ(weight), 0 for an empty or weightless list
pub fn weighted_mean(factors: &[FraudFactor]) -> f64 {
    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = factors.iter().map(|f| f.weight * f.impact).sum();
    (weighted / total_weight).clamp(RiskScore::MIN, RiskScore::MAX)
}

/// Risk level to pipeline action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Recommended action
    pub action: RecommendedAction,

    /// Step-up verification needed
    pub verification_required: bool,
}

/// Explicit level → action table
pub struct DecisionPolicy {
    table: [(RiskLevel, RecommendedAction); 4],
}

impl DecisionPolicy {
    /// Standard table: approve, review, require verification, block
    pub fn new() -> Self {
        Self {
            table: [
                (RiskLevel::Low, RecommendedAction::Approve),
                (RiskLevel::Medium, RecommendedAction::Review),
                (RiskLevel::High, RecommendedAction::RequireVerification),
                (RiskLevel::Critical, RecommendedAction::Block),
            ],
        }
    }

    /// Decision for a level
    pub fn decide(&self, level: RiskLevel) -> Decision {
        let action = self
            .table
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, action)| *action)
            .unwrap_or(RecommendedAction::Review);

        Decision {
            action,
            verification_required: level.is_elevated(),
        }
    }

    /// Decision when every collaborator was unavailable: hold for review and
    /// step up, never auto-decline on missing data
    pub fn conservative(&self) -> Decision {
        Decision {
            action: RecommendedAction::Review,
            verification_required: true,
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// amount × score / 100, rounded to cents
pub fn estimated_loss(amount: Decimal, score: RiskScore) -> Decimal {
    let fraction = Decimal::from_f64(score.value() / 100.0).unwrap_or(Decimal::ZERO);
    (amount * fraction).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FactorCategory;

    fn factor(weight: f64, impact: f64) -> FraudFactor {
        FraudFactor::new("f", FactorCategory::Transaction, weight, impact)
    }

    #[test]
    fn test_empty_factors() {
        let scorer = RiskScorer::default();
        let outcome = scorer.score(&[]);

        assert_eq!(outcome.risk_score.value(), 0.0);
        assert_eq!(outcome.risk_level, RiskLevel::Low);
        assert_eq!(outcome.confidence, 0.5);
        assert_eq!(DecisionPolicy::new().decide(outcome.risk_level).action, RecommendedAction::Approve);
    }

    #[test]
    fn test_weighted_average() {
        let scorer = RiskScorer::default();

        let outcome = scorer.score(&[factor(0.8, 45.0)]);
        assert_eq!(outcome.risk_score.value(), 45.0);
        assert_eq!(outcome.risk_level, RiskLevel::Medium);

        // (0.9 * 88 + 0.4 * 30) / 1.3
        let outcome = scorer.score(&[factor(0.9, 88.0), factor(0.4, 30.0)]);
        assert!((outcome.risk_score.value() - 70.153_846).abs() < 1e-4);
        assert_eq!(outcome.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_zero_weight_scores_zero() {
        assert_eq!(weighted_mean(&[factor(0.0, 90.0)]), 0.0);
    }

    #[test]
    fn test_confidence() {
        let scorer = RiskScorer::default();
        // (0.8 + 0.45) / 2
        assert!((scorer.confidence(&[factor(0.8, 45.0)]) - 0.625).abs() < 1e-9);

        let degraded = scorer.degraded(&[factor(0.8, 45.0)], 1);
        assert!((degraded.confidence - 0.3125).abs() < 1e-9);
        assert_eq!(degraded.risk_score.value(), 45.0);
    }

    #[test]
    fn test_conservative() {
        let scorer = RiskScorer::default();
        let outcome = scorer.conservative(&[], 2);

        assert_eq!(outcome.risk_score.value(), 60.0);
        assert_eq!(outcome.risk_level, RiskLevel::High);
        assert_eq!(outcome.confidence, 0.125);

        // Weak surviving evidence caps confidence below the healthy run
        let weak = [factor(0.1, 1.0)];
        let healthy = scorer.score(&weak);
        let outcome = scorer.conservative(&weak, 1);
        assert_eq!(outcome.risk_score.value(), 60.0);
        assert!((healthy.confidence - 0.055).abs() < 1e-9);
        assert!((outcome.confidence - 0.0275).abs() < 1e-9);

        // Strong evidence never lifts it above neutral
        let strong = [factor(1.0, 100.0)];
        assert_eq!(scorer.conservative(&strong, 1).confidence, 0.25);

        let decision = DecisionPolicy::new().conservative();
        assert_eq!(decision.action, RecommendedAction::Review);
        assert!(decision.verification_required);
    }

    #[test]
    fn test_policy_table() {
        let policy = DecisionPolicy::new();
        let cases = [
            (RiskLevel::Low, RecommendedAction::Approve, false),
            (RiskLevel::Medium, RecommendedAction::Review, false),
            (RiskLevel::High, RecommendedAction::RequireVerification, true),
            (RiskLevel::Critical, RecommendedAction::Block, true),
        ];
        for (level, action, verify) in cases {
            let decision = policy.decide(level);
            assert_eq!(decision.action, action);
            assert_eq!(decision.verification_required, verify);
        }
    }

    #[test]
    fn test_estimated_loss() {
        let loss = estimated_loss(Decimal::from(1_500), RiskScore::new(45.0));
        assert_eq!(loss, Decimal::from(675));
        assert_eq!(estimated_loss(Decimal::from(1_500), RiskScore::new(0.0)), Decimal::ZERO);
    }
}
