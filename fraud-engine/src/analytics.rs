//! Rolling assessment statistics
//!
//! Observability only; nothing here feeds back into scoring. State is
//! in-process and lost on restart.

use crate::types::{
    FraudFactor, RecommendedAction, RiskAssessment, RiskLevel, RiskScore, TransactionContext,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Totals {
    total_transactions: u64,
    flagged_transactions: u64,
    mean_risk_score: f64,
    volume_by_currency: BTreeMap<String, Decimal>,
    by_level: BTreeMap<RiskLevel, u64>,
    by_action: BTreeMap<RecommendedAction, u64>,
    degraded_assessments: u64,
    alerts_created: u64,
    processing_samples: u64,
    mean_processing_time_us: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct FactorTally {
    count: u64,
    mean_impact: f64,
}

/// Per-factor statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorStats {
    /// Factor name
    pub name: String,

    /// Assessments carrying the factor
    pub count: u64,

    /// Mean impact when present
    pub mean_impact: f64,
}

/// Point-in-time analytics view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Assessments recorded
    pub total_transactions: u64,

    /// Assessments at high or critical
    pub flagged_transactions: u64,

    /// Mean score over all assessments
    pub mean_risk_score: f64,

    /// Assessed volume per currency
    pub volume_by_currency: BTreeMap<String, Decimal>,

    /// Assessments per risk level
    pub by_level: BTreeMap<RiskLevel, u64>,

    /// Assessments per recommended action
    pub by_action: BTreeMap<RecommendedAction, u64>,

    /// Assessments with a collaborator unavailable
    pub degraded_assessments: u64,

    /// Alerts raised
    pub alerts_created: u64,

    /// Mean assessment latency in microseconds
    pub mean_processing_time_us: f64,

    /// Most frequent first
    pub factors: Vec<FactorStats>,
}

impl AnalyticsSnapshot {
    /// Share of transactions flagged (score >= 30)
    pub fn flag_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }
        self.flagged_transactions as f64 / self.total_transactions as f64
    }
}

/// Analytics aggregator
#[derive(Default)]
pub struct AnalyticsAggregator {
    totals: Mutex<Totals>,

    // Map: factor name -> tally
    factors: DashMap<String, FactorTally>,
}

impl AnalyticsAggregator {
    /// Create empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one scored transaction and its factors
    pub fn record(&self, ctx: &TransactionContext, score: RiskScore, factors: &[FraudFactor]) {
        {
            let mut totals = self.totals.lock();
            totals.total_transactions += 1;
            if score.is_flagged() {
                totals.flagged_transactions += 1;
            }
            let n = totals.total_transactions as f64;
            totals.mean_risk_score += (score.value() - totals.mean_risk_score) / n;
            *totals
                .volume_by_currency
                .entry(ctx.currency.clone())
                .or_insert(Decimal::ZERO) += ctx.amount;
        }

        for factor in factors {
            let mut tally = self.factors.entry(factor.name.clone()).or_default();
            tally.count += 1;
            tally.mean_impact += (factor.impact - tally.mean_impact) / tally.count as f64;
        }
    }

    /// Count a full assessment: score, level, action, degradation, latency
    pub fn record_assessment(&self, ctx: &TransactionContext, assessment: &RiskAssessment) {
        self.record(ctx, assessment.risk_score, &assessment.factors);

        let mut totals = self.totals.lock();
        *totals.by_level.entry(assessment.risk_level).or_insert(0) += 1;
        *totals.by_action.entry(assessment.recommended_action).or_insert(0) += 1;
        if assessment.is_degraded() {
            totals.degraded_assessments += 1;
        }
        totals.processing_samples += 1;
        let n = totals.processing_samples as f64;
        totals.mean_processing_time_us +=
            (assessment.processing_time_us as f64 - totals.mean_processing_time_us) / n;
    }

    /// Count a raised alert
    pub fn record_alert(&self) {
        self.totals.lock().alerts_created += 1;
    }

    /// Current statistics
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let mut factors: Vec<FactorStats> = self
            .factors
            .iter()
            .map(|entry| FactorStats {
                name: entry.key().clone(),
                count: entry.count,
                mean_impact: entry.mean_impact,
            })
            .collect();
        factors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

        let totals = self.totals.lock();
        AnalyticsSnapshot {
            total_transactions: totals.total_transactions,
            flagged_transactions: totals.flagged_transactions,
            mean_risk_score: totals.mean_risk_score,
            volume_by_currency: totals.volume_by_currency.clone(),
            by_level: totals.by_level.clone(),
            by_action: totals.by_action.clone(),
            degraded_assessments: totals.degraded_assessments,
            alerts_created: totals.alerts_created,
            mean_processing_time_us: totals.mean_processing_time_us,
            factors,
        }
    }
}
