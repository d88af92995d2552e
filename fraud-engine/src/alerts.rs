//! Fraud alert lifecycle
//!
//! One alert per high or critical assessment. Alerts move
//! active → investigating → resolved | false_positive; the terminal states are
//! reached only through [`AlertManager::resolve_alert`].

use crate::types::{
    FactorCategory, FraudFactor, RecommendedAction, RiskAssessment, RiskLevel, RiskScore,
    TransactionContext,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Alert status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Open, awaiting triage
    Active,
    /// Picked up by an analyst
    Investigating,
    /// Closed as handled
    Resolved,
    /// Closed as not fraud
    FalsePositive,
}

impl AlertStatus {
    /// Resolved or false positive
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Low-risk assessment
    Low,
    /// Medium-risk assessment
    Medium,
    /// High-risk assessment
    High,
    /// Critical-risk assessment
    Critical,
}

impl From<RiskLevel> for AlertSeverity {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => AlertSeverity::Low,
            RiskLevel::Medium => AlertSeverity::Medium,
            RiskLevel::High => AlertSeverity::High,
            RiskLevel::Critical => AlertSeverity::Critical,
        }
    }
}

/// Alert type, picked by factor category priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Driven by device signals
    DeviceCompromise,
    /// Driven by location signals
    LocationAnomaly,
    /// Driven by behaviour or a matched pattern
    BehavioralAnomaly,
    /// Anything else
    SuspiciousTransaction,
}

impl AlertType {
    /// Device > location > behavioral/pattern > suspicious transaction
    pub fn classify(factors: &[FraudFactor]) -> Self {
        let has = |category: FactorCategory| factors.iter().any(|f| f.category == category);

        if has(FactorCategory::Device) {
            AlertType::DeviceCompromise
        } else if has(FactorCategory::Location) {
            AlertType::LocationAnomaly
        } else if has(FactorCategory::Behavioral)
            || factors.iter().any(|f| f.name.starts_with("pattern:"))
        {
            AlertType::BehavioralAnomaly
        } else {
            AlertType::SuspiciousTransaction
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AlertType::DeviceCompromise => "Device compromise",
            AlertType::LocationAnomaly => "Location anomaly",
            AlertType::BehavioralAnomaly => "Behavioral anomaly",
            AlertType::SuspiciousTransaction => "Suspicious transaction",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operator outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Fraud confirmed, account actioned
    ConfirmedFraud,
    /// Legitimate activity
    FalsePositive,
    /// Closed without action
    Dismissed,
}

impl ResolutionAction {
    fn target_status(&self) -> AlertStatus {
        match self {
            ResolutionAction::FalsePositive => AlertStatus::FalsePositive,
            ResolutionAction::ConfirmedFraud | ResolutionAction::Dismissed => AlertStatus::Resolved,
        }
    }
}

/// Resolution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Analyst or system that resolved the alert
    pub resolver: String,

    /// Resolution time
    pub resolved_at: DateTime<Utc>,

    /// Outcome
    pub action: ResolutionAction,

    /// Free-text notes
    pub notes: String,
}

impl Resolution {
    /// Resolution stamped now
    pub fn new(resolver: impl Into<String>, action: ResolutionAction, notes: impl Into<String>) -> Self {
        Self {
            resolver: resolver.into(),
            resolved_at: Utc::now(),
            action,
            notes: notes.into(),
        }
    }
}

/// Fraud alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Alert ID
    pub id: Uuid,

    /// Severity, from the risk level
    pub severity: AlertSeverity,

    /// Alert type
    pub alert_type: AlertType,

    /// Category of the highest-impact factor
    pub category: FactorCategory,

    /// Short human-readable summary
    pub title: String,

    /// Transaction ID
    pub transaction_id: Uuid,

    /// Assessment that raised the alert
    pub assessment_id: Uuid,

    /// Sending user
    pub user_id: String,

    /// Score of the assessment
    pub risk_score: RiskScore,

    /// Current status
    pub status: AlertStatus,

    /// Action recommended by the assessment
    pub recommended_action: RecommendedAction,

    /// Evidence collected from the factors
    pub evidence: Vec<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,

    /// Set once the alert is terminal
    pub resolution: Option<Resolution>,
}

/// Lifecycle notification for the external notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    /// New alert raised
    Created {
        /// Alert as created
        alert: FraudAlert,
    },
    /// Analyst picked the alert up
    InvestigationStarted {
        /// Alert after the transition
        alert: FraudAlert,
    },
    /// Alert reached a terminal status
    Resolved {
        /// Alert with its resolution
        alert: FraudAlert,
    },
}

/// Alert manager
pub struct AlertManager {
    // Map: alert_id -> FraudAlert
    alerts: DashMap<Uuid, FraudAlert>,

    // Map: assessment_id -> alert_id
    by_assessment: DashMap<Uuid, Uuid>,

    events: Option<mpsc::Sender<AlertEvent>>,
}

impl AlertManager {
    /// Create manager without an event channel
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            by_assessment: DashMap::new(),
            events: None,
        }
    }

    /// Create manager publishing lifecycle events
    pub fn with_events(events: mpsc::Sender<AlertEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    /// Raise an alert for a high or critical assessment. Repeated calls for
    /// the same assessment return the existing alert.
    pub fn on_assessment(
        &self,
        ctx: &TransactionContext,
        assessment: &RiskAssessment,
    ) -> Option<FraudAlert> {
        if !assessment.risk_level.is_elevated() {
            return None;
        }

        let alert = match self.by_assessment.entry(assessment.assessment_id) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                drop(existing);
                return self.alerts.get(&id).map(|a| a.value().clone());
            }
            Entry::Vacant(slot) => {
                let alert = build_alert(ctx, assessment);
                self.alerts.insert(alert.id, alert.clone());
                slot.insert(alert.id);
                alert
            }
        };

        info!(
            alert = %alert.id,
            transaction = %alert.transaction_id,
            "{:?} alert raised: {}",
            alert.severity,
            alert.title
        );
        self.publish(AlertEvent::Created {
            alert: alert.clone(),
        });
        Some(alert)
    }

    /// All alerts, oldest first
    pub fn alerts(&self) -> Vec<FraudAlert> {
        let mut alerts: Vec<FraudAlert> = self.alerts.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// Alerts in a given status, oldest first
    pub fn alerts_by_status(&self, status: AlertStatus) -> Vec<FraudAlert> {
        let mut alerts = self.alerts();
        alerts.retain(|a| a.status == status);
        alerts
    }

    /// Fetch one alert
    pub fn alert(&self, id: Uuid) -> Result<FraudAlert> {
        self.alerts
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(Error::AlertNotFound(id))
    }

    /// active → investigating
    pub fn start_investigation(&self, id: Uuid) -> Result<FraudAlert> {
        let alert = self.transition(id, AlertStatus::Investigating, |alert| {
            alert.status == AlertStatus::Active
        }, |_| {})?;

        info!(alert = %id, "Investigation started");
        self.publish(AlertEvent::InvestigationStarted {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    /// Close an open alert
    pub fn resolve_alert(&self, id: Uuid, resolution: Resolution) -> Result<FraudAlert> {
        let target = resolution.action.target_status();
        let resolver = resolution.resolver.clone();

        let alert = self.transition(id, target, |alert| !alert.status.is_terminal(), move |alert| {
            alert.resolution = Some(resolution);
        })?;

        info!(alert = %id, resolver = %resolver, "Alert closed as {:?}", target);
        self.publish(AlertEvent::Resolved {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    /// Number of alerts
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// No alerts raised yet
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    fn transition(
        &self,
        id: Uuid,
        to: AlertStatus,
        allowed: impl FnOnce(&FraudAlert) -> bool,
        apply: impl FnOnce(&mut FraudAlert),
    ) -> Result<FraudAlert> {
        let mut alert = self.alerts.get_mut(&id).ok_or(Error::AlertNotFound(id))?;
        if !allowed(&alert) {
            return Err(Error::InvalidAlertTransition {
                id,
                from: alert.status,
                to,
            });
        }

        alert.status = to;
        alert.updated_at = Utc::now();
        apply(&mut alert);
        Ok(alert.clone())
    }

    fn publish(&self, event: AlertEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.try_send(event) {
            warn!("Alert event dropped: {}", e);
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

fn build_alert(ctx: &TransactionContext, assessment: &RiskAssessment) -> FraudAlert {
    let alert_type = AlertType::classify(&assessment.factors);
    let top = assessment
        .factors
        .iter()
        .max_by(|a, b| a.impact.total_cmp(&b.impact));

    let title = match top {
        Some(factor) => format!("{}: {} (impact {:.0})", alert_type, factor.name, factor.impact),
        None => format!("{}: risk signals unavailable", alert_type),
    };

    let mut evidence: Vec<String> = assessment
        .factors
        .iter()
        .flat_map(|f| f.evidence.iter().cloned())
        .collect();
    if assessment.is_degraded() {
        let missing: Vec<&str> = assessment.unavailable.iter().map(|c| c.as_str()).collect();
        evidence.push(format!("Unavailable: {}", missing.join(", ")));
    }

    let now = Utc::now();
    FraudAlert {
        id: Uuid::new_v4(),
        severity: assessment.risk_level.into(),
        alert_type,
        category: top.map(|f| f.category).unwrap_or(FactorCategory::Transaction),
        title,
        transaction_id: assessment.transaction_id,
        assessment_id: assessment.assessment_id,
        user_id: ctx.user_id.clone(),
        risk_score: assessment.risk_score,
        status: AlertStatus::Active,
        recommended_action: assessment.recommended_action,
        evidence,
        created_at: now,
        updated_at: now,
        resolution: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::context;
    use crate::types::Collaborator;
    use rust_decimal::Decimal;

    fn assessment(score: f64, factors: Vec<FraudFactor>) -> RiskAssessment {
        let risk_score = RiskScore::new(score);
        RiskAssessment {
            assessment_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            risk_score,
            risk_level: risk_score.level(),
            confidence: 0.8,
            factors,
            recommended_action: RecommendedAction::RequireVerification,
            verification_required: true,
            estimated_loss: Decimal::ZERO,
            processing_time_us: 10,
            unavailable: Vec::new(),
            alert_id: None,
            assessed_at: Utc::now(),
        }
    }

    fn factor(name: &str, category: FactorCategory, impact: f64) -> FraudFactor {
        FraudFactor::new(name, category, 0.7, impact).with_evidence(format!("{} evidence", name))
    }

    #[test]
    fn test_alert_only_for_elevated_levels() {
        let manager = AlertManager::new();
        let ctx = context(100);

        assert!(manager.on_assessment(&ctx, &assessment(59.9, vec![])).is_none());
        assert!(manager.on_assessment(&ctx, &assessment(60.0, vec![])).is_some());
        assert!(manager.on_assessment(&ctx, &assessment(95.0, vec![])).is_some());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_one_alert_per_assessment() {
        let manager = AlertManager::new();
        let ctx = context(100);
        let a = assessment(85.0, vec![factor("velocity", FactorCategory::Behavioral, 88.0)]);

        let first = manager.on_assessment(&ctx, &a).unwrap();
        let second = manager.on_assessment(&ctx, &a).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.len(), 1);
        assert_eq!(first.assessment_id, a.assessment_id);
        assert_eq!(first.severity, AlertSeverity::Critical);
        assert_eq!(first.title, "Behavioral anomaly: velocity (impact 88)");
    }

    #[test]
    fn test_type_priority() {
        let device = factor("device_risk", FactorCategory::Device, 40.0);
        let location = factor("location_anomaly", FactorCategory::Location, 70.0);
        let pattern = factor("pattern:night_drain", FactorCategory::Temporal, 90.0);
        let amount = factor("amount_anomaly", FactorCategory::Transaction, 45.0);

        assert_eq!(
            AlertType::classify(&[amount.clone(), pattern.clone(), location.clone(), device]),
            AlertType::DeviceCompromise
        );
        assert_eq!(
            AlertType::classify(&[amount.clone(), pattern.clone(), location]),
            AlertType::LocationAnomaly
        );
        assert_eq!(
            AlertType::classify(&[amount.clone(), pattern]),
            AlertType::BehavioralAnomaly
        );
        assert_eq!(AlertType::classify(&[amount]), AlertType::SuspiciousTransaction);
    }

    #[test]
    fn test_lifecycle() {
        let manager = AlertManager::new();
        let alert = manager
            .on_assessment(&context(100), &assessment(70.0, vec![]))
            .unwrap();
        assert_eq!(alert.status, AlertStatus::Active);

        let alert = manager.start_investigation(alert.id).unwrap();
        assert_eq!(alert.status, AlertStatus::Investigating);
        assert!(manager.start_investigation(alert.id).is_err());

        let resolved = manager
            .resolve_alert(
                alert.id,
                Resolution::new("analyst-7", ResolutionAction::FalsePositive, "known payee"),
            )
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::FalsePositive);
        assert_eq!(resolved.resolution.as_ref().unwrap().resolver, "analyst-7");

        let again = manager.resolve_alert(
            alert.id,
            Resolution::new("analyst-8", ResolutionAction::ConfirmedFraud, ""),
        );
        assert!(matches!(
            again,
            Err(Error::InvalidAlertTransition {
                from: AlertStatus::FalsePositive,
                to: AlertStatus::Resolved,
                ..
            })
        ));
        assert_eq!(manager.alerts_by_status(AlertStatus::FalsePositive).len(), 1);
    }

    #[test]
    fn test_unknown_alert() {
        let manager = AlertManager::new();
        let id = Uuid::new_v4();
        assert!(matches!(manager.alert(id), Err(Error::AlertNotFound(_))));
        assert!(manager
            .resolve_alert(id, Resolution::new("a", ResolutionAction::Dismissed, ""))
            .is_err());
    }

    #[test]
    fn test_events_published() {
        let (tx, mut rx) = mpsc::channel(8);
        let manager = AlertManager::with_events(tx);

        let mut degraded = assessment(60.0, vec![]);
        degraded.unavailable = vec![Collaborator::History, Collaborator::DeviceRegistry];
        let alert = manager.on_assessment(&context(100), &degraded).unwrap();
        assert_eq!(alert.evidence, vec!["Unavailable: history, device_registry".to_string()]);

        manager
            .resolve_alert(alert.id, Resolution::new("ops", ResolutionAction::ConfirmedFraud, ""))
            .unwrap();

        assert!(matches!(rx.try_recv(), Ok(AlertEvent::Created { .. })));
        match rx.try_recv() {
            Ok(AlertEvent::Resolved { alert }) => assert_eq!(alert.status, AlertStatus::Resolved),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
