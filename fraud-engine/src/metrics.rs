//! Metrics collection for observability
//!
//! Prometheus metrics registered on an engine-owned registry, so several
//! engines can live in one process.
//!
//! # Metrics
//!
//! - `fraud_assessments_total{level}` - Assessments by risk level
//! - `fraud_assessment_duration_seconds` - Histogram of assessment latencies
//! - `fraud_alerts_total` - Alerts raised
//! - `fraud_collaborator_unavailable_total{collaborator}` - Failed or timed-out lookups
//! - `fraud_rule_faults_total` - Rules that faulted during evaluation

use crate::types::{Collaborator, RiskLevel};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct EngineMetrics {
    /// Assessments by level
    pub assessments_total: IntCounterVec,

    /// Assessment duration histogram
    pub assessment_duration: Histogram,

    /// Alerts raised
    pub alerts_total: IntCounter,

    /// Collaborator failures by collaborator
    pub collaborator_unavailable: IntCounterVec,

    /// Faulted rule evaluations
    pub rule_faults: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl EngineMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let assessments_total = IntCounterVec::new(
            Opts::new("fraud_assessments_total", "Assessments by risk level"),
            &["level"],
        )?;
        registry.register(Box::new(assessments_total.clone()))?;

        let assessment_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fraud_assessment_duration_seconds",
                "Histogram of assessment latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500]),
        )?;
        registry.register(Box::new(assessment_duration.clone()))?;

        let alerts_total = IntCounter::new("fraud_alerts_total", "Alerts raised")?;
        registry.register(Box::new(alerts_total.clone()))?;

        let collaborator_unavailable = IntCounterVec::new(
            Opts::new(
                "fraud_collaborator_unavailable_total",
                "Collaborator lookups that failed or missed the deadline",
            ),
            &["collaborator"],
        )?;
        registry.register(Box::new(collaborator_unavailable.clone()))?;

        let rule_faults = IntCounter::new("fraud_rule_faults_total", "Faulted rule evaluations")?;
        registry.register(Box::new(rule_faults.clone()))?;

        Ok(Self {
            assessments_total,
            assessment_duration,
            alerts_total,
            collaborator_unavailable,
            rule_faults,
            registry,
        })
    }

    /// Record a completed assessment
    pub fn record_assessment(&self, level: RiskLevel, duration_seconds: f64) {
        self.assessments_total.with_label_values(&[level.as_str()]).inc();
        self.assessment_duration.observe(duration_seconds);
    }

    /// Record a raised alert
    pub fn record_alert(&self) {
        self.alerts_total.inc();
    }

    /// Record a collaborator failure
    pub fn record_unavailable(&self, collaborator: Collaborator) {
        self.collaborator_unavailable
            .with_label_values(&[collaborator.as_str()])
            .inc();
    }

    /// Record faulted rules
    pub fn record_rule_faults(&self, count: usize) {
        self.rule_faults.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
