//! Fraud engine
//!
//! One async invocation per transaction. History and device lookups run
//! concurrently, each bounded by the caller's deadline; a collaborator that
//! fails or runs out of time contributes no factors and halves confidence.
//! When every consulted collaborator is unavailable the engine returns a
//! fixed high-risk outcome that holds the transaction for review.

use crate::alerts::{AlertEvent, AlertManager, AlertStatus, FraudAlert, Resolution};
use crate::analytics::{AnalyticsAggregator, AnalyticsSnapshot};
use crate::config::EngineConfig;
use crate::device::{DeviceRecord, DeviceStore, DeviceTrustRegistry, InMemoryDeviceStore};
use crate::factors::RiskFactorAggregator;
use crate::history::{HistoryProvider, HistoryWindow, InMemoryHistory, UserHistory};
use crate::metrics::EngineMetrics;
use crate::patterns::{FraudPattern, FraudRule, PatternEngine, PatternSnapshot, RuleSnapshot};
use crate::scoring::{estimated_loss, DecisionPolicy, RiskScorer};
use crate::types::{AssessmentInput, Collaborator, RiskAssessment, TransactionContext};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builder for [`FraudEngine`]
pub struct FraudEngineBuilder {
    config: EngineConfig,
    history: Option<Arc<dyn HistoryProvider>>,
    device_store: Option<Arc<dyn DeviceStore>>,
    alert_events: Option<mpsc::Sender<AlertEvent>>,
    patterns: Vec<FraudPattern>,
}

impl FraudEngineBuilder {
    /// Start from a configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            history: None,
            device_store: None,
            alert_events: None,
            patterns: Vec::new(),
        }
    }

    /// History provider (defaults to an empty [`InMemoryHistory`])
    pub fn history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    /// Device store (defaults to [`InMemoryDeviceStore`])
    pub fn device_store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.device_store = Some(store);
        self
    }

    /// Publish alert lifecycle events on this channel
    pub fn alert_events(mut self, events: mpsc::Sender<AlertEvent>) -> Self {
        self.alert_events = Some(events);
        self
    }

    /// Register an extra pattern after the configured ones
    pub fn pattern(mut self, pattern: FraudPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Validate configuration and assemble the engine
    pub fn build(self) -> Result<FraudEngine> {
        self.config.validate()?;

        let patterns = Arc::new(if self.config.load_default_patterns {
            PatternEngine::with_defaults()?
        } else {
            PatternEngine::new()
        });
        if let Some(path) = &self.config.patterns_file {
            patterns.load_file(path)?;
        }
        for pattern in self.patterns {
            patterns.upsert_pattern(pattern)?;
        }

        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistory::new()));
        let store = self
            .device_store
            .unwrap_or_else(|| Arc::new(InMemoryDeviceStore::new()));
        let alerts = match self.alert_events {
            Some(events) => AlertManager::with_events(events),
            None => AlertManager::new(),
        };

        info!(
            "{} ready: {} patterns, deadline {}ms",
            self.config.service_name,
            patterns.snapshot().len(),
            self.config.deadline_ms
        );

        Ok(FraudEngine {
            devices: DeviceTrustRegistry::new(store, self.config.device.clone()),
            aggregator: RiskFactorAggregator::new(self.config.factors.clone(), Arc::clone(&patterns)),
            scorer: RiskScorer::new(self.config.scoring.clone()),
            policy: DecisionPolicy::new(),
            alerts,
            analytics: AnalyticsAggregator::new(),
            metrics: EngineMetrics::new()?,
            history,
            patterns,
            config: self.config,
        })
    }
}

/// Real-time transaction risk engine
pub struct FraudEngine {
    config: EngineConfig,
    history: Arc<dyn HistoryProvider>,
    devices: DeviceTrustRegistry,
    patterns: Arc<PatternEngine>,
    aggregator: RiskFactorAggregator,
    scorer: RiskScorer,
    policy: DecisionPolicy,
    alerts: AlertManager,
    analytics: AnalyticsAggregator,
    metrics: EngineMetrics,
}

impl FraudEngine {
    /// Builder over a configuration
    pub fn builder(config: EngineConfig) -> FraudEngineBuilder {
        FraudEngineBuilder::new(config)
    }

    /// Engine with default configuration and in-memory collaborators
    pub fn new() -> Result<Self> {
        Self::builder(EngineConfig::default()).build()
    }

    /// Assess a transaction within the configured deadline
    pub async fn assess_transaction_risk(&self, ctx: &TransactionContext) -> Result<RiskAssessment> {
        self.assess_transaction_risk_within(ctx, self.config.deadline())
            .await
    }

    /// Assess a transaction, giving each collaborator at most `deadline`.
    ///
    /// Only invalid input is an error; collaborator failures degrade the
    /// assessment instead.
    pub async fn assess_transaction_risk_within(
        &self,
        ctx: &TransactionContext,
        deadline: Duration,
    ) -> Result<RiskAssessment> {
        let started = Instant::now();
        if let Err(e) = ctx.validate() {
            warn!(transaction = %ctx.transaction_id, "Rejected: {}", e);
            return Err(e);
        }

        let patterns = self.patterns.snapshot();
        let deadline_at = tokio::time::Instant::now() + deadline;

        let (history, device) = tokio::join!(
            self.fetch_history(ctx, deadline_at, deadline),
            self.fetch_device(ctx, deadline_at, deadline)
        );

        let mut unavailable = Vec::new();
        let history = match history {
            Ok(history) => Some(history),
            Err(e) => {
                self.mark_unavailable(Collaborator::History, ctx, &e, &mut unavailable);
                None
            }
        };

        let mut consulted = 1;
        let device = match device {
            None => None,
            Some(Ok(record)) => {
                consulted += 1;
                Some(record)
            }
            Some(Err(e)) => {
                consulted += 1;
                self.mark_unavailable(Collaborator::DeviceRegistry, ctx, &e, &mut unavailable);
                None
            }
        };

        let input = AssessmentInput::new(ctx, history.as_ref(), device.as_ref());
        let assembly = self.aggregator.assemble(&input, &patterns, ctx.timestamp);
        if !assembly.rule_faults.is_empty() {
            self.metrics.record_rule_faults(assembly.rule_faults.len());
        }

        let (outcome, decision) = if unavailable.len() == consulted {
            warn!(
                transaction = %ctx.transaction_id,
                "No collaborator available, returning conservative assessment"
            );
            (
                self.scorer.conservative(&assembly.factors, unavailable.len()),
                self.policy.conservative(),
            )
        } else {
            let outcome = self.scorer.degraded(&assembly.factors, unavailable.len());
            (outcome, self.policy.decide(outcome.risk_level))
        };

        let mut assessment = RiskAssessment {
            assessment_id: Uuid::new_v4(),
            transaction_id: ctx.transaction_id,
            risk_score: outcome.risk_score,
            risk_level: outcome.risk_level,
            confidence: outcome.confidence,
            factors: assembly.factors,
            recommended_action: decision.action,
            verification_required: decision.verification_required,
            estimated_loss: estimated_loss(ctx.amount, outcome.risk_score),
            processing_time_us: 0,
            unavailable,
            alert_id: None,
            assessed_at: Utc::now(),
        };

        if let Some(alert) = self.alerts.on_assessment(ctx, &assessment) {
            assessment.alert_id = Some(alert.id);
            self.analytics.record_alert();
            self.metrics.record_alert();
        }

        let elapsed = started.elapsed();
        assessment.processing_time_us = elapsed.as_micros() as u64;
        self.analytics.record_assessment(ctx, &assessment);
        self.metrics
            .record_assessment(assessment.risk_level, elapsed.as_secs_f64());

        if assessment.risk_level.is_elevated() {
            info!(
                transaction = %ctx.transaction_id,
                "Assessed {} risk (score {}, action {})",
                assessment.risk_level,
                assessment.risk_score,
                assessment.recommended_action
            );
        } else {
            debug!(
                transaction = %ctx.transaction_id,
                "Assessed {} risk (score {}, {} factors)",
                assessment.risk_level,
                assessment.risk_score,
                assessment.factors.len()
            );
        }

        Ok(assessment)
    }

    async fn fetch_history(
        &self,
        ctx: &TransactionContext,
        deadline_at: tokio::time::Instant,
        deadline: Duration,
    ) -> Result<UserHistory> {
        let baseline = HistoryWindow::new(chrono::Duration::days(
            self.config.history.baseline_window_days,
        ));
        let velocity = HistoryWindow::new(chrono::Duration::minutes(
            self.config.history.velocity_window_minutes,
        ));

        let lookup = async {
            let (baseline, recent) = tokio::try_join!(
                self.history.summary(&ctx.user_id, baseline, ctx.timestamp),
                self.history.summary(&ctx.user_id, velocity, ctx.timestamp)
            )?;
            Ok::<_, Error>(UserHistory {
                baseline,
                transactions_last_hour: recent.transaction_count,
            })
        };

        match timeout_at(deadline_at, lookup).await {
            Ok(result) => result,
            Err(_) => Err(deadline_exceeded(Collaborator::History, deadline)),
        }
    }

    /// `None` when the transaction carries no fingerprint
    async fn fetch_device(
        &self,
        ctx: &TransactionContext,
        deadline_at: tokio::time::Instant,
        deadline: Duration,
    ) -> Option<Result<DeviceRecord>> {
        let fingerprint = ctx.device.as_ref()?;

        let lookup = async {
            let existing = self.devices.lookup(&fingerprint.device_id).await?;
            let record = self
                .devices
                .observe(fingerprint, existing.as_ref(), ctx.timestamp);
            self.devices.record(record.clone()).await?;
            Ok::<_, Error>(record)
        };

        Some(match timeout_at(deadline_at, lookup).await {
            Ok(result) => result,
            Err(_) => Err(deadline_exceeded(Collaborator::DeviceRegistry, deadline)),
        })
    }

    fn mark_unavailable(
        &self,
        collaborator: Collaborator,
        ctx: &TransactionContext,
        error: &Error,
        unavailable: &mut Vec<Collaborator>,
    ) {
        warn!(
            transaction = %ctx.transaction_id,
            "Continuing without {}: {}",
            collaborator.as_str(),
            error
        );
        self.metrics.record_unavailable(collaborator);
        unavailable.push(collaborator);
    }

    /// All alerts, oldest first
    pub fn alerts(&self) -> Vec<FraudAlert> {
        self.alerts.alerts()
    }

    /// Alerts in a given status
    pub fn alerts_by_status(&self, status: AlertStatus) -> Vec<FraudAlert> {
        self.alerts.alerts_by_status(status)
    }

    /// Fetch one alert
    pub fn alert(&self, id: Uuid) -> Result<FraudAlert> {
        self.alerts.alert(id)
    }

    /// Move an active alert to investigating
    pub fn start_investigation(&self, id: Uuid) -> Result<FraudAlert> {
        self.alerts.start_investigation(id)
    }

    /// Close an open alert
    pub fn resolve_alert(&self, id: Uuid, resolution: Resolution) -> Result<FraudAlert> {
        self.alerts.resolve_alert(id, resolution)
    }

    /// Patterns with counters
    pub fn patterns(&self) -> Vec<PatternSnapshot> {
        self.patterns.patterns()
    }

    /// One pattern with counters
    pub fn pattern(&self, id: &str) -> Result<PatternSnapshot> {
        self.patterns.pattern(id)
    }

    /// Register or replace a pattern
    pub fn upsert_pattern(&self, pattern: FraudPattern) -> Result<()> {
        self.patterns.upsert_pattern(pattern)
    }

    /// Activate or deactivate a pattern
    pub fn set_pattern_active(&self, id: &str, active: bool) -> Result<()> {
        self.patterns.set_pattern_active(id, active)
    }

    /// Remove a pattern
    pub fn remove_pattern(&self, id: &str) -> Result<FraudPattern> {
        self.patterns.remove_pattern(id)
    }

    /// Rules with counters
    pub fn rules(&self) -> Vec<RuleSnapshot> {
        self.patterns.rules()
    }

    /// Replace or append a rule in a pattern
    pub fn update_rule(&self, pattern_id: &str, rule: FraudRule) -> Result<()> {
        self.patterns.update_rule(pattern_id, rule)
    }

    /// Enable or disable a rule
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        self.patterns.set_rule_enabled(rule_id, enabled)
    }

    /// Analytics snapshot
    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    /// Mark a device as trusted
    pub async fn enroll_device(&self, device_id: &str) -> Result<DeviceRecord> {
        self.devices.enroll(device_id).await
    }

    /// Withdraw trust from a device
    pub async fn revoke_device(&self, device_id: &str) -> Result<DeviceRecord> {
        self.devices.revoke(device_id).await
    }

    /// Look up a device record
    pub async fn device(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        self.devices.lookup(device_id).await
    }

    /// Engine metrics
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn deadline_exceeded(collaborator: Collaborator, deadline: Duration) -> Error {
    Error::unavailable(
        collaborator.as_str(),
        format!("no answer within {}ms", deadline.as_millis()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fixtures;
    use crate::history::TransactionRecord;
    use crate::types::fixtures::context;
    use crate::types::{RecommendedAction, RiskLevel};

    fn engine_without_patterns(history: Arc<InMemoryHistory>) -> FraudEngine {
        let config = EngineConfig {
            load_default_patterns: false,
            ..EngineConfig::default()
        };
        FraudEngine::builder(config).history(history).build().unwrap()
    }

    #[tokio::test]
    async fn test_clean_transaction_approved() {
        let engine = engine_without_patterns(Arc::new(InMemoryHistory::new()));
        let assessment = engine.assess_transaction_risk(&context(50)).await.unwrap();

        assert_eq!(assessment.risk_score.value(), 0.0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.recommended_action, RecommendedAction::Approve);
        assert_eq!(assessment.confidence, 0.5);
        assert!(!assessment.is_degraded());
        assert!(assessment.alert_id.is_none());
        assert_eq!(engine.analytics().total_transactions, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let engine = engine_without_patterns(Arc::new(InMemoryHistory::new()));
        let mut ctx = context(50);
        ctx.currency = "dollars".to_string();

        assert!(matches!(
            engine.assess_transaction_risk(&ctx).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(engine.analytics().total_transactions, 0);
    }

    #[tokio::test]
    async fn test_velocity_reads_trailing_window() {
        let history = Arc::new(InMemoryHistory::new());
        let ctx = context(40);
        for minutes in 1..=7 {
            history.record(
                &ctx.user_id,
                TransactionRecord {
                    transaction_id: Uuid::new_v4(),
                    amount: ctx.amount,
                    recipient_id: ctx.recipient_id.clone(),
                    country: ctx.location.country.clone(),
                    timestamp: ctx.timestamp - chrono::Duration::minutes(minutes * 5),
                },
            );
        }

        let engine = engine_without_patterns(history);
        let assessment = engine.assess_transaction_risk(&ctx).await.unwrap();
        assert_eq!(assessment.factors.len(), 1);
        assert_eq!(assessment.factors[0].name, "velocity");
        assert_eq!(assessment.factors[0].impact, 56.0);
    }

    #[tokio::test]
    async fn test_device_sighting_recorded() {
        let engine = engine_without_patterns(Arc::new(InMemoryHistory::new()));
        let mut ctx = context(50);
        ctx.device = Some(fixtures::nominal_fingerprint("phone-1"));

        engine.assess_transaction_risk(&ctx).await.unwrap();
        let record = engine.device("phone-1").await.unwrap().unwrap();
        assert_eq!(record.sightings, 1);
        assert!(!record.is_trusted);
        assert_eq!(record.risk_score, 0.2);

        engine.enroll_device("phone-1").await.unwrap();
        engine.assess_transaction_risk(&ctx).await.unwrap();
        let record = engine.device("phone-1").await.unwrap().unwrap();
        assert_eq!(record.sightings, 2);
        assert!(record.is_trusted);
        assert_eq!(record.risk_score, 0.0);
    }

    #[tokio::test]
    async fn test_alert_linked_to_assessment() {
        let (tx, mut rx) = mpsc::channel(4);
        let config = EngineConfig {
            load_default_patterns: false,
            ..EngineConfig::default()
        };
        let engine = FraudEngine::builder(config).alert_events(tx).build().unwrap();

        let mut ctx = context(50);
        ctx.device = Some(fixtures::scripted_fingerprint("bot-1"));
        let assessment = engine.assess_transaction_risk(&ctx).await.unwrap();

        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        let alert_id = assessment.alert_id.unwrap();
        let alert = engine.alert(alert_id).unwrap();
        assert_eq!(alert.assessment_id, assessment.assessment_id);
        assert!(matches!(rx.try_recv(), Ok(AlertEvent::Created { .. })));
        assert_eq!(engine.metrics().alerts_total.get(), 1);
        assert_eq!(engine.analytics().alerts_created, 1);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.deadline_ms = 0;
        assert!(matches!(
            FraudEngine::builder(config).build(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
